//! The error taxonomy a Tunnel reasons about, distinct from the `anyhow::Error`
//! used at the I/O/task boundary around it.

use std::io;
use thiserror::Error;

/// Errors a Tunnel's state machine can hit while driving a connection.
/// `Incomplete` is deliberately not a member of this enum: it is not an error,
/// just a signal to wait for more bytes.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("cryptographic operation failed")]
    CryptoFailure,

    #[error("upstream connect failed: {0}")]
    Upstream(#[source] io::Error),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
}

/// Fatal at process startup only; never produced once the Reactor is running.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("key must be exactly 32 bytes, got {0}")]
    BadKeyLength(usize),

    #[error("invalid listen port: {0}")]
    BadPort(String),

    #[error("{0}")]
    Other(String),
}
