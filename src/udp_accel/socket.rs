//! UDP socket bring-up for acceleration v2 (spec §4.8).
//!
//! A throwaway socket is transiently `connect`ed to the peer solely to let
//! the kernel pick a local address/port via `getsockname`; the socket we
//! actually use for the data plane is bound separately to that same port so
//! it stays unconnected and can receive from any source.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::error::SessionError;

/// A bound, unconnected, non-blocking UDP socket plus the local endpoint the
/// kernel assigned it.
pub struct AccelSocket {
    pub socket: UdpSocket,
    pub local_ipv4: Ipv4Addr,
    pub local_port: u16,
}

impl AccelSocket {
    pub async fn bind(peer_addr: SocketAddr) -> Result<Self, SessionError> {
        let probe = UdpSocket::bind("0.0.0.0:0").await?;
        probe.connect(peer_addr).await?;
        let local_addr = probe.local_addr()?;
        drop(probe);

        let local_ipv4 = match local_addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => {
                return Err(SessionError::SessionConnectFailed(
                    "udp accel requires an IPv4 local address".to_string(),
                ))
            }
        };

        // Re-bind to the same port, unconnected, so it can receive from any
        // source. The port stays free between `drop(probe)` and this bind on
        // any reasonable kernel given SO_REUSEADDR semantics aren't needed
        // here (nothing else is listening on it).
        let socket = UdpSocket::bind((std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_addr.port())).await?;

        Ok(Self {
            socket,
            local_ipv4,
            local_port: local_addr.port(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_observes_a_nonzero_local_port() {
        let peer: SocketAddr = "127.0.0.1:59999".parse().unwrap();
        let accel = AccelSocket::bind(peer).await.unwrap();
        assert_ne!(accel.local_port, 0);
        assert_eq!(accel.local_ipv4, Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn socket_receives_from_unconnected_peer_after_bind() {
        let placeholder: SocketAddr = "127.0.0.1:59998".parse().unwrap();
        let accel = AccelSocket::bind(placeholder).await.unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let accel_addr: SocketAddr = format!("127.0.0.1:{}", accel.local_port).parse().unwrap();
        sender.send_to(b"ping", accel_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = accel.socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, sender.local_addr().unwrap());
    }
}
