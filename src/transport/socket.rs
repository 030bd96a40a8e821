//! Low-level socket creation via socket2.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Result, TransportError};

/// Socket-level options shared by the adapters.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub reuse_addr: bool,
    pub nodelay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_addr: true,
            nodelay: true,
        }
    }
}

/// Create a non-blocking TCP socket for `addr`'s address family.
///
/// The socket is not bound or connected; callers bind/listen/connect as
/// their mode requires.
pub fn create_tcp_socket(addr: SocketAddr, options: &SocketOptions) -> Result<Socket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| TransportError::SocketError(e.to_string()))?;

    if options.reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::SocketError(format!("set reuse addr: {e}")))?;
    }

    if options.nodelay {
        socket
            .set_nodelay(true)
            .map_err(|e| TransportError::SocketError(format!("set nodelay: {e}")))?;
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::SocketError(format!("set nonblocking: {e}")))?;

    Ok(socket)
}

/// Create a non-blocking UDP socket bound to `addr`.
pub fn create_udp_socket(addr: SocketAddr, options: &SocketOptions) -> Result<Socket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| TransportError::SocketError(e.to_string()))?;

    if options.reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::SocketError(format!("set reuse addr: {e}")))?;
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::SocketError(format!("set nonblocking: {e}")))?;

    socket
        .bind(&addr.into())
        .map_err(|e| TransportError::BindFailed {
            addr,
            reason: e.to_string(),
        })?;

    Ok(socket)
}
