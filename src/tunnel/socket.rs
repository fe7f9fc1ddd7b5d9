//! Remote socket construction and hostname resolution

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpSocket;
use tracing::trace;

use super::TunnelError;
use crate::config::Config;

/// Type-of-service byte applied to outbound sockets (low delay)
const DEFAULT_TOS: u32 = 0x10;

/// Send/receive buffer size applied to outbound sockets
const SOCKET_BUFFER: usize = 64 * 1024;

/// Build an outbound TCP socket for `addr` with the configured options.
///
/// Rejects unspecified or multicast addresses and port zero. Every option
/// after the socket opens is best-effort; failures are swallowed and the
/// socket is still returned.
pub fn new_remote_socket(config: &Config, addr: SocketAddr) -> Result<TcpSocket, TunnelError> {
    if addr.ip().is_unspecified() || addr.ip().is_multicast() || addr.port() == 0 {
        return Err(TunnelError::InvalidEndpoint(addr.to_string()));
    }

    let domain = match addr.ip() {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_nonblocking(true).ok();
    socket.set_send_buffer_size(SOCKET_BUFFER).ok();
    socket.set_recv_buffer_size(SOCKET_BUFFER).ok();
    #[cfg(unix)]
    socket.set_tos(DEFAULT_TOS).ok();
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    socket.set_nosigpipe(true).ok();
    #[cfg(target_os = "linux")]
    clear_dont_fragment(&socket);
    socket.set_nodelay(config.turbo).ok();
    #[cfg(target_os = "linux")]
    set_fast_open(&socket, config.fast_open);

    Ok(TcpSocket::from_std_stream(socket.into()))
}

/// Build an outbound TCP socket from `config.inbound`.
pub fn default_remote_socket(config: &Config) -> Result<TcpSocket, TunnelError> {
    let ip: IpAddr = config
        .inbound
        .ip
        .parse()
        .map_err(|_| TunnelError::InvalidEndpoint(config.inbound.ip.clone()))?;
    if ip.is_unspecified() || ip.is_multicast() {
        return Err(TunnelError::InvalidEndpoint(config.inbound.ip.clone()));
    }
    new_remote_socket(config, SocketAddr::new(ip, config.inbound.port))
}

/// Resolve `host` to at most one endpoint.
pub async fn resolve_endpoint(host: &str, port: u16) -> Option<SocketAddr> {
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            trace!(host, error = %e, "hostname resolution failed");
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn clear_dont_fragment(socket: &Socket) {
    use std::os::unix::io::AsRawFd;
    let value: libc::c_int = libc::IP_PMTUDISC_DONT;
    unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(target_os = "linux")]
fn set_fast_open(socket: &Socket, enabled: bool) {
    use std::os::unix::io::AsRawFd;
    let value: libc::c_int = enabled as libc::c_int;
    unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_FASTOPEN,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    #[test]
    fn test_rejects_invalid_endpoints() {
        let config = Config::default();

        let unspecified: SocketAddr = "0.0.0.0:80".parse().unwrap();
        assert!(new_remote_socket(&config, unspecified).is_err());

        let multicast: SocketAddr = "224.0.0.1:80".parse().unwrap();
        assert!(new_remote_socket(&config, multicast).is_err());

        let zero_port: SocketAddr = "127.0.0.1:0".parse().unwrap();
        assert!(new_remote_socket(&config, zero_port).is_err());
    }

    #[test]
    fn test_builds_loopback_socket() {
        let config = Config::default();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(new_remote_socket(&config, addr).is_ok());
    }

    #[test]
    fn test_default_overload_parses_inbound() {
        let mut config = Config::default();
        assert!(default_remote_socket(&config).is_ok());

        config.inbound = EndpointConfig {
            ip: "not an ip".to_string(),
            port: 80,
        };
        assert!(default_remote_socket(&config).is_err());

        config.inbound = EndpointConfig {
            ip: "0.0.0.0".to_string(),
            port: 80,
        };
        assert!(default_remote_socket(&config).is_err());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_endpoint("localhost", 80).await;
        assert!(addr.is_some());
        assert_eq!(addr.unwrap().port(), 80);
    }

    #[tokio::test]
    async fn test_resolve_failure_is_none() {
        assert!(resolve_endpoint("nonexistent.invalid", 80).await.is_none());
    }
}
