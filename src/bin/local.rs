//! `socks5-local`: exposes a plain SOCKS5 endpoint on the user's machine,
//! encrypts client traffic, and forwards it as framed AES-256-CBC records to
//! a `socks5-server` instance.

use anyhow::{Context, Result};
use clap::Parser;
use socks5_tunnel::config::{self, Config};
use socks5_tunnel::tunnel;
use std::process::exit;
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
#[command(name = "socks5-local")]
#[command(about = "Encrypted SOCKS5 proxy local endpoint", long_about = None)]
struct Args {
    /// Address the local endpoint listens on for plaintext SOCKS5 clients.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port the local endpoint listens on.
    #[arg(long, default_value_t = 1080)]
    port: u16,

    /// Host of the socks5-server instance this endpoint forwards to.
    #[arg(long = "remote-host")]
    remote_host: String,

    /// Port of the socks5-server instance this endpoint forwards to.
    #[arg(long = "remote-port")]
    remote_port: u16,

    /// Exactly 32 bytes, shared with the socks5-server instance it forwards to.
    #[arg(long)]
    key: String,
}

fn build_config(args: Args) -> Result<Config> {
    let key = config::parse_key(&args.key).context("invalid --key")?;
    let listen_port = config::parse_port(args.port).context("invalid --port")?;
    let remote_port = config::parse_port(args.remote_port).context("invalid --remote-port")?;
    Ok(Config {
        listen_host: args.host,
        listen_port,
        upstream_host: Some(args.remote_host),
        upstream_port: Some(remote_port),
        key,
        credentials: None,
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
        remote_host = ?config.upstream_host,
        remote_port = ?config.upstream_port,
        "socks5-local listening"
    );

    let config = Arc::new(config);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "fatal listener error");
                exit(1);
            }
        };

        let config = Arc::clone(&config);
        info!(%peer, "accepted client connection");

        tokio::spawn(async move {
            if let Err(err) = tunnel::run_local_tunnel(stream, config).await {
                error!(error = %err, "tunnel terminated with error");
            }
        });
    }
}
