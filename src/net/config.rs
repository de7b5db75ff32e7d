//! Server, client and socket configuration.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;

/// Socket-level options applied to every new connection.
#[derive(Debug, Clone, Default)]
pub struct TcpOptions {
    /// Enable SO_KEEPALIVE.
    pub keep_alive: bool,
    /// Enable TCP_NODELAY.
    pub no_delay: bool,
    /// SO_LINGER timeout; `None` keeps the kernel default.
    pub linger: Option<Duration>,
}

/// Apply `options` to a connected stream.
///
/// tokio only exposes TCP_NODELAY directly, so keep-alive and linger go
/// through a borrowed `socket2` handle.
pub(crate) fn apply_tcp_options(stream: &TcpStream, options: &TcpOptions) -> io::Result<()> {
    stream.set_nodelay(options.no_delay)?;

    let socket = SockRef::from(stream);
    socket.set_keepalive(options.keep_alive)?;
    socket.set_linger(options.linger)?;

    Ok(())
}

/// Configuration for [`Server`](crate::net::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address to bind.
    pub bind_addr: IpAddr,
    /// Local port; 0 picks an ephemeral port.
    pub port: u16,
    /// Number of parallel accept workers (at least 1).
    pub acceptor_parallelism: usize,
    /// Options applied to every accepted connection.
    pub tcp: TcpOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            acceptor_parallelism: 1,
            tcp: TcpOptions::default(),
        }
    }
}

/// Configuration for [`Client`](crate::net::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote address to dial.
    pub remote_addr: IpAddr,
    /// Remote port.
    pub port: u16,
    /// Give up dialing after this long; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Options applied to the dialed connection.
    pub tcp: TcpOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            connect_timeout: None,
            tcp: TcpOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.acceptor_parallelism, 1);
        assert_eq!(server.port, 0);
        assert!(!server.tcp.keep_alive);
        assert!(!server.tcp.no_delay);
        assert!(server.tcp.linger.is_none());

        let client = ClientConfig::default();
        assert!(client.connect_timeout.is_none());
    }

    #[tokio::test]
    async fn test_apply_options_to_live_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stream, _accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let stream = stream.unwrap();

        let options = TcpOptions {
            keep_alive: true,
            no_delay: true,
            linger: Some(Duration::from_secs(1)),
        };

        apply_tcp_options(&stream, &options).unwrap();
        assert!(stream.nodelay().unwrap());
    }
}
