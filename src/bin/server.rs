//! `socks5-server`: accepts framed-encrypted connections from a `socks5-local`
//! instance, speaks SOCKS5 with the embedded client over the decrypted
//! channel, and relays payload to the requested destination.

use anyhow::{Context, Result};
use clap::Parser;
use socks5_tunnel::config::{self, Config};
use socks5_tunnel::tunnel;
use std::process::exit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging() {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"));
    let filter_layer = match filter_layer {
        Ok(layer) => layer,
        Err(_) => EnvFilter::new("info"),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

#[derive(Parser)]
#[command(name = "socks5-server")]
#[command(about = "Encrypted SOCKS5 proxy server", long_about = None)]
struct Args {
    /// Address the server listens on for framed-encrypted connections from socks5-local.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port the server listens on.
    #[arg(long, default_value_t = 1080)]
    port: u16,

    /// Exactly 32 bytes, shared with the socks5-local instance it serves.
    #[arg(long)]
    key: String,

    /// Username for SOCKS5 username/password auth. Empty (with `--password`) disables it.
    #[arg(long, default_value = "")]
    username: String,

    /// Password for SOCKS5 username/password auth. Empty (with `--username`) disables it.
    #[arg(long, default_value = "")]
    password: String,
}

fn build_config(args: Args) -> Result<Config> {
    let key = config::parse_key(&args.key).context("invalid --key")?;
    let listen_port = config::parse_port(args.port).context("invalid --port")?;
    let credentials = config::credentials_from(&args.username, &args.password);
    Ok(Config {
        listen_host: args.host,
        listen_port,
        upstream_host: None,
        upstream_port: None,
        key,
        credentials,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    let config = match build_config(args) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            exit(1);
        }
    };

    let listener = match socks5_tunnel::reactor::bind(&config.listen_host, config.listen_port).await
    {
        Ok(listener) => listener,
        Err(err) => {
            error!(
                host = %config.listen_host,
                port = config.listen_port,
                error = %err,
                "failed to bind listener"
            );
            exit(1);
        }
    };
    info!(
        host = %config.listen_host,
        port = config.listen_port,
        auth = config.credentials.is_some(),
        "socks5-server listening"
    );

    let config = Arc::new(config);
    let next_client_id = AtomicU64::new(1);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "fatal listener error");
                exit(1);
            }
        };

        let client_id = next_client_id.fetch_add(1, Ordering::Relaxed);
        let config = Arc::clone(&config);
        info!(client_id, %peer, "accepted connection");

        tokio::spawn(async move {
            if let Err(err) = tunnel::run_server_tunnel(stream, config, client_id).await {
                error!(client_id, error = %err, "tunnel terminated with error");
            }
        });
    }
}
