//! Stateless socket helpers and typed configurations (§4.1).

use crate::error::{ErrorType, NetworkError, NetworkResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

/// Longest IPv4 dotted-quad plus NUL, e.g. `"255.255.255.255"`.
pub const IPV4_BUF_LEN: usize = 16;

/// Walks all non-loopback IPv4 interfaces, preferring the first whose name
/// begins with `wlan`. Writes the dotted-quad into `buf` (no heap
/// allocation) and returns the written slice; `"0.0.0.0"` if none found.
pub fn get_local_ipv4_into(buf: &mut [u8; IPV4_BUF_LEN]) -> &str {
    let interfaces = if_addrs::get_if_addrs().unwrap_or_default();

    let mut fallback: Option<String> = None;
    let mut wlan: Option<String> = None;

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }

        let ip = match iface.addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            _ => continue,
        };

        if iface.name.starts_with("wlan") && wlan.is_none() {
            wlan = Some(ip.to_string());
        }

        if fallback.is_none() {
            fallback = Some(ip.to_string());
        }
    }

    let chosen = wlan.or(fallback).unwrap_or_else(|| "0.0.0.0".to_string());
    let bytes = chosen.as_bytes();
    let len = bytes.len().min(buf.len() - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf[len] = 0;

    std::str::from_utf8(&buf[..len]).unwrap_or("0.0.0.0")
}

/// Convenience allocating wrapper over [`get_local_ipv4_into`].
pub fn get_local_ipv4() -> String {
    let mut buf = [0u8; IPV4_BUF_LEN];
    get_local_ipv4_into(&mut buf).to_string()
}

/// True iff [`get_local_ipv4`] resolves to something other than `0.0.0.0`.
pub fn has_connection() -> bool {
    get_local_ipv4() != "0.0.0.0"
}

/// TCP socket tuning applied uniformly at connect/accept time.
#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
    pub buffer_size: usize,
    pub recv_timeout: Option<Duration>,
    pub keepalive: bool,
}

impl Default for TcpConfig {
    fn default() -> TcpConfig {
        TcpConfig {
            buffer_size: 64 * 1024,
            recv_timeout: None,
            keepalive: false,
        }
    }
}

/// Applies `config` to an already-connected/accepted stream: `TCP_NODELAY`,
/// send/recv buffer sizes, optional recv timeout, optional `SO_KEEPALIVE`.
pub fn configure_tcp_socket(stream: &TcpStream, config: &TcpConfig) -> NetworkResult<()> {
    stream.set_nodelay(true)?;

    let sock = socket2::SockRef::from(stream);
    sock.set_send_buffer_size(config.buffer_size)?;
    sock.set_recv_buffer_size(config.buffer_size)?;

    if let Some(timeout) = config.recv_timeout {
        stream.set_read_timeout(Some(timeout))?;
    }

    if config.keepalive {
        sock.set_keepalive(true)?;
    }

    Ok(())
}

/// Creates a streaming IPv4 listener bound `0.0.0.0:port` with address reuse
/// and a backlog of 1. On any setup failure the socket is dropped and a
/// descriptive [`ErrorType::SocketSetup`] is returned.
pub fn create_listen_socket(port: u16) -> NetworkResult<TcpListener> {
    (|| -> std::io::Result<TcpListener> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        let addr: SocketAddr = SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port).into();
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        socket.set_nonblocking(false)?;
        Ok(socket.into())
    })()
    .map_err(|err| NetworkError::Fatal(ErrorType::SocketSetup(err.to_string())))
}

/// Creates a datagram IPv4 socket with `SO_BROADCAST` set, used to send
/// discovery responses/queries to `255.255.255.255`.
pub fn create_broadcast_socket() -> NetworkResult<UdpSocket> {
    (|| -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        socket.bind(&SocketAddr::from(SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 0)).into())?;
        Ok(socket.into())
    })()
    .map_err(|err| NetworkError::Fatal(ErrorType::SocketSetup(err.to_string())))
}

/// Creates a datagram IPv4 socket bound `0.0.0.0:port`, non-blocking, with
/// address reuse, used to receive discovery responses/queries.
pub fn create_discovery_listen_socket(port: u16) -> NetworkResult<UdpSocket> {
    (|| -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let addr: SocketAddr = SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port).into();
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    })()
    .map_err(|err| NetworkError::Fatal(ErrorType::SocketSetup(err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ip_falls_back_to_unspecified_buffer_contract() {
        let mut buf = [0u8; IPV4_BUF_LEN];
        let ip = get_local_ipv4_into(&mut buf);
        // Either a real dotted quad or the documented fallback; either way
        // the NUL terminator must be present right after the written slice.
        assert_eq!(buf[ip.len()], 0);
    }

    #[test]
    fn listen_socket_binds_ephemeral_port() {
        let listener = create_listen_socket(0).unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn discovery_socket_is_nonblocking() {
        let socket = create_discovery_listen_socket(0).unwrap();
        let mut buf = [0u8; 4];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }
}
