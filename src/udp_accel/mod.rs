//! UDP acceleration engine (spec §4.8): the data-plane path used once the
//! engine has confirmed round-trip liveness over UDP, with TCP as the
//! always-available fallback.

pub mod crypto;
pub mod endpoints;
pub mod readiness;
pub mod socket;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::error::SessionError;
use crate::handshake::{UdpAccelAdvertisement, UdpAccelWelcome};
use crypto::{CryptoBox, DataPlaneMessage};
use endpoints::EndpointBook;
use readiness::ReadinessTracker;
use socket::AccelSocket;

/// Base keep-alive delays (spec §4.8): fast-detect mode probes sooner.
const KEEPALIVE_BASE_FAST_MS: u64 = 700;
const KEEPALIVE_BASE_NORMAL_MS: u64 = 1500;
const KEEPALIVE_JITTER_MS: u64 = 800;
const KEEPALIVE_ACK_RATE_LIMIT_MS: u64 = 250;

/// Generate the client's 128-byte `clientKeyV2` and 20-byte `clientKeyV1`
/// for the Auth pack (spec §4.8's "Keys" subsection), advertising the local
/// address/port observed on `socket` (spec §4.8's "Socket" subsection: the
/// kernel-chosen endpoint, learned via a transient connect, has to reach the
/// server inside the same Auth pack the keys travel in).
pub fn generate_client_keys(socket: &AccelSocket) -> UdpAccelAdvertisement {
    let mut rng = rand::thread_rng();
    let mut client_key_v2 = [0u8; 128];
    rng.fill_bytes(&mut client_key_v2);
    let mut client_key_v1 = [0u8; 20];
    rng.fill_bytes(&mut client_key_v1);

    UdpAccelAdvertisement {
        client_key_v2,
        client_key_v1,
        local_ipv4: socket.local_ipv4,
        local_port: socket.local_port,
    }
}

/// The running UDP acceleration engine: socket, crypto boxes, readiness, and
/// endpoint state, all owned by the dedicated UDP I/O lane (spec §5).
pub struct UdpAccelEngine {
    socket: AccelSocket,
    send_box: CryptoBox,
    recv_cipher: chacha20poly1305::ChaCha20Poly1305,
    readiness: ReadinessTracker,
    endpoints: EndpointBook,
    server_cookie: u32,
    client_cookie: u32,
    started_at: Instant,
    last_ka_ack_sent: Option<Instant>,
    fast_detect: bool,
}

impl UdpAccelEngine {
    /// Build the running engine around a socket that was already bound (and
    /// whose local endpoint was already advertised in the Auth pack) back in
    /// `generate_client_keys`.
    pub async fn start(
        socket: AccelSocket,
        client_advert: &UdpAccelAdvertisement,
        welcome: &UdpAccelWelcome,
        configured_endpoint: Option<SocketAddr>,
    ) -> Result<Self, SessionError> {
        let mut initial_nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut initial_nonce);
        let send_box = CryptoBox::new(&client_advert.client_key_v2, initial_nonce)?;
        let recv_cipher = CryptoBox::receive_cipher(&welcome.server_key_v2)?;

        let mut readiness = ReadinessTracker::new();
        readiness.set_data_path_configured(true);
        readiness.set_fast_detect(welcome.fast_disconnect_detect);

        let mut endpoints = EndpointBook::new();
        endpoints.configured = configured_endpoint;
        if let (Some(ip), Some(port)) = (welcome.reported_ipv4, welcome.reported_port) {
            endpoints.reported = Some(SocketAddr::new(ip.into(), port));
        }

        Ok(Self {
            socket,
            send_box,
            recv_cipher,
            readiness,
            endpoints,
            server_cookie: welcome.server_cookie,
            client_cookie: welcome.client_cookie,
            started_at: Instant::now(),
            last_ka_ack_sent: None,
            fast_detect: welcome.fast_disconnect_detect,
        })
    }

    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready(self.now_ms())
    }

    /// Send an Ethernet frame over the data path, if ready and pinned.
    /// Returns `false` if the caller should fall through to TCP.
    pub async fn try_send(&mut self, ethernet_payload: &[u8]) -> Result<bool, SessionError> {
        if !self.is_ready() || self.endpoints.pinned.is_none() {
            return Ok(false);
        }
        let dest = self.endpoints.primary().unwrap();
        self.send_payload(dest, ethernet_payload).await?;
        Ok(true)
    }

    async fn send_payload(&mut self, dest: SocketAddr, payload: &[u8]) -> Result<(), SessionError> {
        let now = self.now_ms().max(1); // replace 0 with 1 per spec
        let message = DataPlaneMessage {
            cookie: self.server_cookie,
            my_tick: now,
            your_tick: self.readiness.last_received_server_tick(),
            payload: payload.to_vec(),
        };
        let wire = self.send_box.seal(&message)?;
        self.socket.socket.send_to(&wire, dest).await?;
        Ok(())
    }

    /// Process one inbound UDP datagram. Returns the decoded Ethernet
    /// payload if the packet carried data (empty payload = keep-alive, which
    /// is consumed here and triggers an ACK instead of being returned).
    pub async fn on_datagram(&mut self, from: SocketAddr, wire: &[u8]) -> Option<Vec<u8>> {
        let message = CryptoBox::open(wire, &self.recv_cipher)?;
        if message.cookie != self.client_cookie {
            return None;
        }

        let now = self.now_ms();
        if !self.readiness.on_packet(now, message.my_tick, message.your_tick) {
            return None; // stale, dropped
        }

        if self.readiness.can_pin_endpoint() {
            self.endpoints.try_pin(from, now, &mut self.readiness);
        }

        if message.payload.is_empty() {
            self.maybe_ack_keepalive(from).await;
            None
        } else {
            Some(message.payload)
        }
    }

    async fn maybe_ack_keepalive(&mut self, dest: SocketAddr) {
        let now = Instant::now();
        if let Some(last) = self.last_ka_ack_sent {
            if now.duration_since(last) < Duration::from_millis(KEEPALIVE_ACK_RATE_LIMIT_MS) {
                return;
            }
        }
        self.last_ka_ack_sent = Some(now);
        let _ = self.send_payload(dest, &[]).await;
    }

    /// Compute the next one-shot keep-alive delay (spec §4.8 cadence).
    pub fn next_keepalive_delay(&self) -> Duration {
        let base = if self.fast_detect {
            KEEPALIVE_BASE_FAST_MS
        } else {
            KEEPALIVE_BASE_NORMAL_MS
        };
        let jitter = (rand::thread_rng().next_u32() % (KEEPALIVE_JITTER_MS as u32 + 1)) as u64;
        Duration::from_millis(base + jitter)
    }

    /// Block until one UDP datagram arrives and hand back the decoded
    /// Ethernet payload, if any (`None` for keep-alives or stale/foreign
    /// packets). The sole receive entry point the UDP I/O lane needs; the
    /// socket itself stays private to this module.
    pub async fn recv_next(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let mut buf = [0u8; 65536];
        let (n, from) = self.socket.socket.recv_from(&mut buf).await?;
        Ok(self.on_datagram(from, &buf[..n]).await)
    }

    /// Fire one keep-alive cycle: always to the primary destination, plus
    /// fallbacks if not yet ready.
    pub async fn send_keepalive_cycle(&mut self) -> Result<(), SessionError> {
        let Some(primary) = self.endpoints.primary() else {
            return Ok(());
        };
        self.send_payload(primary, &[]).await?;

        if !self.is_ready() {
            for fallback in self.endpoints.fallbacks() {
                self.send_payload(fallback, &[]).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_client_keys_produces_distinct_keys() {
        let peer: SocketAddr = "127.0.0.1:59997".parse().unwrap();
        let socket_a = AccelSocket::bind(peer).await.unwrap();
        let socket_b = AccelSocket::bind(peer).await.unwrap();
        let a = generate_client_keys(&socket_a);
        let b = generate_client_keys(&socket_b);
        assert_ne!(a.client_key_v2.to_vec(), b.client_key_v2.to_vec());
        assert_ne!(a.client_key_v1.to_vec(), b.client_key_v1.to_vec());
    }

    #[tokio::test]
    async fn generate_client_keys_advertises_the_socket_local_endpoint() {
        let peer: SocketAddr = "127.0.0.1:59996".parse().unwrap();
        let socket = AccelSocket::bind(peer).await.unwrap();
        let local_port = socket.local_port;
        let advert = generate_client_keys(&socket);
        assert_eq!(advert.local_ipv4, std::net::Ipv4Addr::LOCALHOST);
        assert_eq!(advert.local_port, local_port);
    }

    #[tokio::test]
    async fn engine_round_trips_a_data_plane_packet_between_two_peers() {
        let client_key_v2 = [1u8; 128];
        let server_key_v2 = [2u8; 128];

        let client_advert = UdpAccelAdvertisement {
            client_key_v2,
            client_key_v1: [0u8; 20],
            local_ipv4: std::net::Ipv4Addr::UNSPECIFIED,
            local_port: 0,
        };
        let server_welcome_for_client = UdpAccelWelcome {
            server_key_v2: server_key_v2.to_vec(),
            server_cookie: 111,
            client_cookie: 222,
            reported_ipv4: None,
            reported_port: None,
            fast_disconnect_detect: false,
        };

        let placeholder: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let client_socket = AccelSocket::bind(placeholder).await.unwrap();
        let mut client_engine =
            UdpAccelEngine::start(client_socket, &client_advert, &server_welcome_for_client, None)
                .await
                .unwrap();

        let server_advert = UdpAccelAdvertisement {
            client_key_v2: server_key_v2,
            client_key_v1: [0u8; 20],
            local_ipv4: std::net::Ipv4Addr::UNSPECIFIED,
            local_port: 0,
        };
        let client_welcome_for_server = UdpAccelWelcome {
            server_key_v2: client_key_v2.to_vec(),
            server_cookie: 222,
            client_cookie: 111,
            reported_ipv4: None,
            reported_port: None,
            fast_disconnect_detect: false,
        };
        let server_socket = AccelSocket::bind(placeholder).await.unwrap();
        let mut server_engine =
            UdpAccelEngine::start(server_socket, &server_advert, &client_welcome_for_server, None)
                .await
                .unwrap();

        let client_addr: SocketAddr =
            format!("127.0.0.1:{}", client_engine.socket.local_port).parse().unwrap();
        let server_addr: SocketAddr =
            format!("127.0.0.1:{}", server_engine.socket.local_port).parse().unwrap();

        client_engine.endpoints.configured = Some(server_addr);
        let wire = {
            let message = DataPlaneMessage {
                cookie: 222,
                my_tick: 5,
                your_tick: 0,
                payload: b"packet-from-client".to_vec(),
            };
            client_engine.send_box.seal(&message).unwrap()
        };
        server_engine.socket.socket.connect(client_addr).await.ok();
        client_engine.socket.socket.send_to(&wire, server_addr).await.unwrap();

        let mut buf = [0u8; 512];
        let (n, from) = server_engine.socket.socket.recv_from(&mut buf).await.unwrap();
        let received = server_engine.on_datagram(from, &buf[..n]).await;
        assert_eq!(received, Some(b"packet-from-client".to_vec()));
    }
}
