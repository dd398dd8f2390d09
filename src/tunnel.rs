//! The per-connection state machine and dual-socket event dispatcher.
//!
//! Each accepted connection gets its own task; within that task the Tunnel
//! owns both TCP halves and its cipher context exclusively, so there is
//! nothing to synchronize across connections.

use crate::address::Address;
use crate::auth::{AuthNeg, AuthState};
use crate::codec::{CipherContext, ConnectionBuffer, FrameCodec};
use crate::config::Config;
use crate::reactor;
use crate::error::TunnelError;
use crate::request::{self, RequestOutcome};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

const READ_CHUNK: usize = 16 * 1024;

/// Server-side protocol state, matching the transition table this Tunnel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Init,
    WaitUserPassAuth,
    Authorized,
    WaitForConnect,
    Connected,
    ClientMustClose,
}

async fn write_frame(stream: &mut TcpStream, codec: &FrameCodec, plaintext: &[u8]) -> Result<()> {
    let mut frame = ConnectionBuffer::new();
    codec
        .encrypt_to(&mut frame, plaintext)
        .map_err(|_| TunnelError::CryptoFailure)?;
    stream
        .write_all(frame.as_slice())
        .await
        .map_err(TunnelError::Transport)
        .context("write encrypted frame")
}

/// Drives one accepted client connection on the server side: method selection,
/// optional username/password sub-negotiation, request parsing, outbound
/// connect, then bidirectional framed relay.
pub async fn run_server_tunnel(
    mut in_stream: TcpStream,
    config: Arc<Config>,
    client_id: u64,
) -> Result<()> {
    let cipher = CipherContext::from_key(config.key);
    let codec = FrameCodec::new(cipher);
    let auth = AuthNeg::new(config.credentials.clone());

    let mut in_buf = ConnectionBuffer::new();
    let mut state = ServerState::Init;
    let mut out_stream: Option<TcpStream> = None;
    let mut read_chunk = vec![0u8; READ_CHUNK];
    let mut close_reason: Option<TunnelError> = None;

    loop {
        match state {
            ServerState::Init | ServerState::WaitUserPassAuth | ServerState::Authorized => {
                let n = in_stream
                    .read(&mut read_chunk)
                    .await
                    .map_err(TunnelError::Transport)
                    .context("read from client")?;
                if n == 0 {
                    info!(client_id, ?state, "client closed connection before handshake completed");
                    return Ok(());
                }
                in_buf.append(&read_chunk[..n]);

                'frames: loop {
                    let peeked = codec
                        .peek_frame(&in_buf)
                        .map_err(|_| TunnelError::CryptoFailure)?;
                    let Some(plaintext) = peeked else {
                        break 'frames;
                    };

                    match state {
                        ServerState::Init => {
                            let (auth_state, reply) = auth.authenticate(&plaintext);
                            match auth_state {
                                AuthState::Incomplete => break 'frames,
                                AuthState::Success => {
                                    codec.drop_frame(&mut in_buf);
                                    if let Some(reply) = reply {
                                        write_frame(&mut in_stream, &codec, &reply).await?;
                                    }
                                    state = ServerState::Authorized;
                                }
                                AuthState::WaitUserPassAuth => {
                                    codec.drop_frame(&mut in_buf);
                                    if let Some(reply) = reply {
                                        write_frame(&mut in_stream, &codec, &reply).await?;
                                    }
                                    state = ServerState::WaitUserPassAuth;
                                }
                                AuthState::Failed => {
                                    codec.drop_frame(&mut in_buf);
                                    if let Some(reply) = reply {
                                        write_frame(&mut in_stream, &codec, &reply).await?;
                                    }
                                    close_reason = Some(TunnelError::AuthFailed);
                                    state = ServerState::ClientMustClose;
                                }
                                AuthState::Error => {
                                    codec.drop_frame(&mut in_buf);
                                    return Err(TunnelError::Protocol(
                                        "malformed method-selection message".to_string(),
                                    )
                                    .into());
                                }
                            }
                        }
                        ServerState::WaitUserPassAuth => {
                            let (auth_state, reply) = auth.validate_user_pass(&plaintext);
                            match auth_state {
                                AuthState::Incomplete => break 'frames,
                                AuthState::Success => {
                                    codec.drop_frame(&mut in_buf);
                                    if let Some(reply) = reply {
                                        write_frame(&mut in_stream, &codec, &reply).await?;
                                    }
                                    state = ServerState::Authorized;
                                }
                                AuthState::Failed => {
                                    codec.drop_frame(&mut in_buf);
                                    if let Some(reply) = reply {
                                        write_frame(&mut in_stream, &codec, &reply).await?;
                                    }
                                    close_reason = Some(TunnelError::AuthFailed);
                                    state = ServerState::ClientMustClose;
                                }
                                AuthState::Error | AuthState::WaitUserPassAuth => {
                                    codec.drop_frame(&mut in_buf);
                                    return Err(TunnelError::Protocol(
                                        "malformed username/password message".to_string(),
                                    )
                                    .into());
                                }
                            }
                        }
                        ServerState::Authorized => {
                            match request::parse_request(&plaintext) {
                                RequestOutcome::Incomplete => break 'frames,
                                RequestOutcome::Reject(rep) => {
                                    codec.drop_frame(&mut in_buf);
                                    let reply = request::encode_reply(rep, None);
                                    write_frame(&mut in_stream, &codec, &reply).await?;
                                    info!(client_id, rep, "request rejected");
                                    return Ok(());
                                }
                                RequestOutcome::Connect(address) => {
                                    codec.drop_frame(&mut in_buf);
                                    state = ServerState::WaitForConnect;
                                    let stream = drive_connect(
                                        &mut in_stream,
                                        &codec,
                                        &address,
                                        client_id,
                                    )
                                    .await?;
                                    out_stream = Some(stream);
                                    state = ServerState::Connected;
                                    break 'frames;
                                }
                            }
                        }
                        ServerState::WaitForConnect | ServerState::Connected | ServerState::ClientMustClose => {
                            unreachable!("resolved inline before re-entering the frame loop")
                        }
                    }
                }
            }
            ServerState::WaitForConnect => {
                unreachable!("WaitForConnect is resolved synchronously inside the Authorized branch")
            }
            ServerState::ClientMustClose => {
                // Any further byte (or EOF) from a client in this state destroys the Tunnel.
                let _ = in_stream.read(&mut read_chunk).await;
                info!(client_id, "destroying tunnel after ClientMustClose");
                return Err(close_reason
                    .take()
                    .unwrap_or_else(|| {
                        TunnelError::Protocol("client sent data after a terminal error".to_string())
                    })
                    .into());
            }
            ServerState::Connected => {
                let out = out_stream.as_mut().expect("Connected implies an outbound connection");
                let mut out_chunk = vec![0u8; READ_CHUNK];
                tokio::select! {
                    result = in_stream.read(&mut read_chunk) => {
                        let n = result.map_err(TunnelError::Transport).context("read from client")?;
                        if n == 0 {
                            return Ok(());
                        }
                        in_buf.append(&read_chunk[..n]);
                        while let Some(plaintext) = codec
                            .decrypt_from(&mut in_buf)
                            .map_err(|_| TunnelError::CryptoFailure)?
                        {
                            out.write_all(&plaintext)
                                .await
                                .map_err(TunnelError::Transport)
                                .context("write to destination")?;
                        }
                    }
                    result = out.read(&mut out_chunk) => {
                        let n = result.map_err(TunnelError::Transport).context("read from destination")?;
                        if n == 0 {
                            return Ok(());
                        }
                        write_frame(&mut in_stream, &codec, &out_chunk[..n]).await?;
                    }
                }
            }
        }
    }
}

/// Races the outbound connect against further client input: per the state
/// table, a byte (or EOF) from the client while `WaitForConnect` destroys the
/// Tunnel rather than waiting out the connect.
async fn drive_connect(
    in_stream: &mut TcpStream,
    codec: &FrameCodec,
    address: &Address,
    client_id: u64,
) -> Result<TcpStream> {
    let connect_fut = reactor::connect(address);
    tokio::pin!(connect_fut);
    let mut stray = [0u8; 1];

    tokio::select! {
        result = &mut connect_fut => {
            match result {
                Ok(stream) => {
                    let local_addr = stream
                        .local_addr()
                        .map_err(TunnelError::Transport)
                        .context("read local address of outbound socket")?;
                    let bound = Address::from_socket_addr(local_addr);
                    let reply = request::encode_reply(request::REP_SUCCESS, Some(&bound));
                    write_frame(in_stream, codec, &reply).await?;
                    info!(client_id, destination = %address, "connected");
                    Ok(stream)
                }
                Err(err) => {
                    let rep = request::rep_for_connect_error(&err);
                    let reply = request::encode_reply(rep, None);
                    write_frame(in_stream, codec, &reply).await?;
                    warn!(client_id, destination = %address, error = %err, "outbound connect failed");
                    Err(TunnelError::Upstream(err).into())
                }
            }
        }
        _ = in_stream.read(&mut stray) => {
            Err(TunnelError::Protocol(
                "client sent data while waiting for outbound connect".to_string(),
            )
            .into())
        }
    }
}

/// Drives one accepted client connection on the local side: no authentication
/// state, just plaintext-to-framed-ciphertext forwarding in both directions.
pub async fn run_local_tunnel(mut client_stream: TcpStream, config: Arc<Config>) -> Result<()> {
    let remote_host = config
        .upstream_host
        .as_deref()
        .context("local tunnel requires an upstream host")?;
    let remote_port = config
        .upstream_port
        .context("local tunnel requires an upstream port")?;

    let mut server_stream = TcpStream::connect((remote_host, remote_port))
        .await
        .map_err(TunnelError::Transport)
        .context("connect to upstream server")?;

    let cipher = CipherContext::from_key(config.key);
    let codec = FrameCodec::new(cipher);
    let mut inbound_ciphertext = ConnectionBuffer::new();
    let mut client_chunk = vec![0u8; READ_CHUNK];
    let mut server_chunk = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            result = client_stream.read(&mut client_chunk) => {
                let n = result.map_err(TunnelError::Transport).context("read from client")?;
                if n == 0 {
                    return Ok(());
                }
                write_frame(&mut server_stream, &codec, &client_chunk[..n]).await?;
            }
            result = server_stream.read(&mut server_chunk) => {
                let n = result.map_err(TunnelError::Transport).context("read from server")?;
                if n == 0 {
                    return Ok(());
                }
                inbound_ciphertext.append(&server_chunk[..n]);
                while let Some(plaintext) = codec
                    .decrypt_from(&mut inbound_ciphertext)
                    .map_err(|_| TunnelError::CryptoFailure)?
                {
                    client_stream
                        .write_all(&plaintext)
                        .await
                        .map_err(TunnelError::Transport)
                        .context("write to client")?;
                }
            }
        }
    }
}
