//! The event-loop-facing surface: a listener, an outbound connector, and the
//! DNS facade, all expressed over tokio's single reactor per process. Each
//! accepted connection is driven by its own task; Tunnels never share state,
//! so scaling across cores is just the runtime's own worker pool scheduling
//! independent tasks.

use crate::address::Address;
use std::io;
use tokio::net::{TcpListener, TcpStream};

/// Binds a TCP listener for a given host/port. Non-blocking and reusable by
/// construction (tokio's `TcpListener` sets `SO_REUSEADDR` on unix).
pub async fn bind(host: &str, port: u16) -> io::Result<TcpListener> {
    TcpListener::bind((host, port)).await
}

/// Opens an outbound TCP connection to `address`, resolving hostnames through
/// the OS's default resolver via tokio's hostname-aware `ToSocketAddrs` impl.
/// IPv4/IPv6 addresses are already concrete and need no resolution; only the
/// `Domain` variant performs an actual DNS lookup (the address-family hint is
/// moot there since both families are acceptable).
pub async fn connect(address: &Address) -> io::Result<TcpStream> {
    match address {
        Address::Ipv4(..) | Address::Ipv6(..) => {
            let socket_addr = std::net::SocketAddr::new(
                match address {
                    Address::Ipv4(bytes, _) => std::net::IpAddr::from(*bytes),
                    Address::Ipv6(bytes, _) => std::net::IpAddr::from(*bytes),
                    _ => unreachable!(),
                },
                address.port(),
            );
            TcpStream::connect(socket_addr).await
        }
        Address::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
        Address::Unknown => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot connect to an unknown address",
        )),
    }
}
