//! Core library shared by the `socks5-local` and `socks5-server` binaries:
//! the typed address, the framed AES-256-CBC channel, the SOCKS5 auth/request
//! state machines, the per-connection tunnel, and the small reactor facade
//! around tokio's listener/connector.

pub mod address;
pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod reactor;
pub mod request;
pub mod tunnel;
