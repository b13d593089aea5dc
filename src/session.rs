//! Session orchestrator (spec §4.1): the single place that owns both
//! transports and drives the state machine described in spec §3. Follows
//! the two-lane model of spec §5 — this actor *is* the session lane; the
//! UDP acceleration engine runs on its own `tokio::spawn`ed lane and talks
//! back only through an `mpsc` "capability to notify" handle, never an
//! `Arc` back-reference.
//!
//! Grounded in the teacher's `Arc<RwLock<...>>` composition around
//! `NooshdarooClient`, generalized here into a command-queue actor so every
//! mutation of session state happens on one task, matching spec §5's
//! "session lane" description literally rather than just in spirit.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::interval;

use crate::arp_resolver::ArpResolver;
use crate::collaborators::{
    AuthSource, Credential, HostFlow, HostPacket, L3Protocol, NetworkSettings, SettingsApplier,
};
use crate::config::SessionConfig;
use crate::dhcp::{DhcpClient, DhcpEvent, NetworkParameters};
use crate::error::{HandshakeError, SessionError};
use crate::framer::{Frame, StreamFramer};
use crate::handshake::{self, AuthMethod, UdpAccelAdvertisement, WelcomeInfo};
use crate::mac::MacAddr;
use crate::pumps::{self, InboundClassification};
use crate::tls::ControlChannel;
use crate::udp_accel::socket::AccelSocket;
use crate::udp_accel::{self, UdpAccelEngine};

const COMMAND_QUEUE_DEPTH: usize = 32;
const DEFAULT_MTU: u16 = 1400;
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Session lifecycle state (spec §3 "Session state"). Strictly monotonic
/// except `Stopped`, which is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TlsHandshaking,
    SoftEtherHandshaking,
    Established,
    Tunneling,
    Stopped(Option<String>),
}

/// Byte/packet counters surfaced for host-side status display, grounded in
/// the teacher's `ProtocolStats`.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub handshake_count: u32,
    pub started_at: Option<Instant>,
}

impl SessionStats {
    pub fn uptime(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

/// The session orchestrator handle. Cloning is cheap; every clone talks to
/// the same underlying actor task.
#[derive(Clone)]
pub struct Session {
    cmd_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<SessionState>>,
    stats: Arc<Mutex<SessionStats>>,
}

enum Command {
    Connect(oneshot::Sender<Result<(), SessionError>>),
    Handshake(Arc<dyn AuthSource>, oneshot::Sender<Result<(), SessionError>>),
    ObtainIp(oneshot::Sender<Result<NetworkParameters, SessionError>>),
    StartTunneling(
        Arc<dyn HostFlow>,
        Arc<dyn SettingsApplier>,
        oneshot::Sender<Result<(), SessionError>>,
    ),
    HandleAppMessage(String, oneshot::Sender<Vec<u8>>),
    Stop(oneshot::Sender<()>),
}

impl Session {
    /// Construct a session and spawn its actor task. `config` is the only
    /// source of truth the engine reads; nothing is pulled from process-wide
    /// state (spec §9 "Global state").
    pub fn new(config: SessionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let state = Arc::new(RwLock::new(SessionState::Idle));
        let stats = Arc::new(Mutex::new(SessionStats::default()));

        let actor = SessionActor {
            config,
            mac: MacAddr::generate_local(),
            control: None,
            hello_random: None,
            welcome: None,
            network: None,
            dhcp: None,
            arp: None,
            udp_cmd_tx: None,
            udp_frame_rx: None,
            state: state.clone(),
            stats: stats.clone(),
        };
        tokio::spawn(actor.run(cmd_rx));

        Self { cmd_tx, state, stats }
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        self.stats.lock().await.clone()
    }

    /// Open the TLS control channel (spec §4.1 `connect`).
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Connect(tx)).await?;
        rx.await.map_err(|_| SessionError::TransportClosed)?
    }

    /// Run Hello/Auth/Welcome (spec §4.1 `handshake`).
    pub async fn handshake(&self, auth_source: Arc<dyn AuthSource>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Handshake(auth_source, tx)).await?;
        rx.await.map_err(|_| SessionError::TransportClosed)?
    }

    /// Run the embedded DHCP DISCOVER/REQUEST cycle (spec §4.1 `obtain_ip_via_dhcp`).
    pub async fn obtain_ip_via_dhcp(&self) -> Result<NetworkParameters, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ObtainIp(tx)).await?;
        rx.await.map_err(|_| SessionError::TransportClosed)?
    }

    /// Apply network settings, start ARP, and begin the bidirectional pump
    /// (spec §4.1 `start_tunneling`). Blocks only until tunneling has
    /// started; the pump itself runs on the actor task.
    pub async fn start_tunneling(
        &self,
        flow: Arc<dyn HostFlow>,
        settings: Arc<dyn SettingsApplier>,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::StartTunneling(flow, settings, tx)).await?;
        rx.await.map_err(|_| SessionError::TransportClosed)?
    }

    /// Deliver a UTF-8 app-level command to the session (spec §6
    /// "App-message handler"). Unknown commands reply with empty bytes.
    pub async fn handle_app_message(&self, command: &str) -> Vec<u8> {
        let (tx, rx) = oneshot::channel();
        if self
            .send(Command::HandleAppMessage(command.to_string(), tx))
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Cancel timers, close both transports, clear ARP/DHCP state.
    /// Idempotent: calling `stop()` on an already-stopped session is a no-op.
    pub async fn stop(&self) {
        if matches!(*self.state.read().await, SessionState::Stopped(_)) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(tx)).await.is_ok() {
            let _ = rx.await;
        } else {
            *self.state.write().await = SessionState::Stopped(None);
        }
    }

    async fn send(&self, cmd: Command) -> Result<(), SessionError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::BadState("session actor has stopped".to_string()))
    }
}

/// Commands accepted by the UDP I/O lane (spec §5's second lane).
enum UdpCommand {
    TrySend(Vec<u8>, oneshot::Sender<bool>),
    Stop,
}

struct SessionActor {
    config: SessionConfig,
    mac: MacAddr,
    control: Option<ControlChannel>,
    hello_random: Option<[u8; 20]>,
    welcome: Option<WelcomeInfo>,
    network: Option<NetworkParameters>,
    dhcp: Option<DhcpClient>,
    arp: Option<ArpResolver>,
    udp_cmd_tx: Option<mpsc::Sender<UdpCommand>>,
    udp_frame_rx: Option<mpsc::Receiver<Vec<u8>>>,
    state: Arc<RwLock<SessionState>>,
    stats: Arc<Mutex<SessionStats>>,
}

impl SessionActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Connect(reply) => {
                    let result = self.do_connect().await;
                    if let Err(e) = &result {
                        self.fail(e.to_string()).await;
                        let _ = reply.send(result);
                        break;
                    }
                    let _ = reply.send(result);
                }
                Command::Handshake(auth_source, reply) => {
                    let result = self.do_handshake(auth_source).await;
                    if let Err(e) = &result {
                        self.fail(e.to_string()).await;
                        let _ = reply.send(result);
                        break;
                    }
                    let _ = reply.send(result);
                }
                Command::ObtainIp(reply) => {
                    let result = self.do_obtain_ip().await;
                    if let Err(e) = &result {
                        self.fail(e.to_string()).await;
                        let _ = reply.send(result);
                        break;
                    }
                    let _ = reply.send(result);
                }
                Command::StartTunneling(flow, settings, reply) => {
                    match self.do_start_tunneling(flow.clone(), settings).await {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                            self.run_tunnel_loop(&mut cmd_rx, flow).await;
                            break;
                        }
                        Err(e) => {
                            self.fail(e.to_string()).await;
                            let _ = reply.send(Err(e));
                            break;
                        }
                    }
                }
                Command::HandleAppMessage(command, reply) => {
                    let _ = reply.send(self.dispatch_app_message(&command));
                }
                Command::Stop(reply) => {
                    self.do_stop(None).await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    async fn fail(&mut self, reason: String) {
        self.do_stop(Some(reason)).await;
    }

    async fn do_stop(&mut self, reason: Option<String>) {
        if let Some(tx) = self.udp_cmd_tx.take() {
            let _ = tx.send(UdpCommand::Stop).await;
        }
        if let Some(channel) = self.control.as_mut() {
            let _ = channel.shutdown().await;
        }
        self.control = None;
        self.arp = None;
        self.dhcp = None;
        *self.state.write().await = SessionState::Stopped(reason);
    }

    async fn require_state(&self, expected: SessionState) -> Result<(), SessionError> {
        let current = self.state.read().await.clone();
        if current == expected {
            Ok(())
        } else {
            Err(SessionError::BadState(format!(
                "expected {current:?} to be {expected:?}"
            )))
        }
    }

    async fn do_connect(&mut self) -> Result<(), SessionError> {
        self.require_state(SessionState::Idle).await?;
        *self.state.write().await = SessionState::TlsHandshaking;

        let addr = self.peer_addr()?;

        let channel = ControlChannel::connect(addr, &self.config.se_host, &self.config.tls_verify).await?;
        self.control = Some(channel);
        Ok(())
    }

    async fn do_handshake(&mut self, auth_source: Arc<dyn AuthSource>) -> Result<(), SessionError> {
        self.require_state(SessionState::TlsHandshaking).await?;
        *self.state.write().await = SessionState::SoftEtherHandshaking;

        let channel = self
            .control
            .as_mut()
            .ok_or_else(|| SessionError::BadState("not connected".to_string()))?;

        let hello = handshake::hello(channel, &self.config.se_host).await?;
        self.hello_random = Some(hello.random20);

        let credential = auth_source.credential().await?;
        let method = match credential {
            Credential::Password { username, password } => AuthMethod::Password { username, password },
            Credential::BearerToken(token) => {
                let username = crate::collaborators::username_from_bearer_token(&token)?;
                AuthMethod::Jwt { username, token }
            }
        };

        // Bind the UDP-acceleration socket before Auth goes out: the Auth
        // pack has to carry the kernel-chosen local address/port (spec
        // §4.8's "Socket" subsection), so the bind can't wait for Welcome.
        let peer_addr = self.peer_addr()?;
        let udp_socket = if self.config.udp_accel_enabled {
            match AccelSocket::bind(peer_addr).await {
                Ok(socket) => Some(socket),
                Err(e) => {
                    log::warn!("udp acceleration socket bind failed, falling back to tcp: {e}");
                    None
                }
            }
        } else {
            None
        };
        let udp_advert = udp_socket.as_ref().map(udp_accel::generate_client_keys);

        let welcome = handshake::auth(
            channel,
            &self.config.se_host,
            &self.config,
            &method,
            &hello.random20,
            udp_advert.as_ref(),
        )
        .await?;

        if let (Some(socket), Some(udp_welcome)) = (udp_socket, welcome.udp_accel.as_ref()) {
            self.start_udp_lane(socket, udp_advert.as_ref().unwrap(), udp_welcome).await;
        }

        self.welcome = Some(welcome);
        self.dhcp = Some(DhcpClient::new(self.mac));

        let mut stats = self.stats.lock().await;
        stats.handshake_count += 1;
        drop(stats);

        *self.state.write().await = SessionState::Established;
        Ok(())
    }

    fn peer_addr(&self) -> Result<SocketAddr, SessionError> {
        let ip: Ipv4Addr = self
            .config
            .se_host
            .parse()
            .map_err(|_| SessionError::ProviderConfig("se_host must be a literal IPv4 address".to_string()))?;
        Ok(SocketAddr::new(ip.into(), self.config.se_port))
    }

    async fn start_udp_lane(
        &mut self,
        socket: AccelSocket,
        advert: &UdpAccelAdvertisement,
        welcome: &crate::handshake::UdpAccelWelcome,
    ) {
        let configured_endpoint = self.peer_addr().ok();

        let engine = match UdpAccelEngine::start(socket, advert, welcome, configured_endpoint).await {
            Ok(engine) => engine,
            Err(e) => {
                log::warn!("udp acceleration did not start, falling back to tcp: {e}");
                return;
            }
        };

        let (udp_cmd_tx, udp_cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (frame_tx, frame_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        self.udp_cmd_tx = Some(udp_cmd_tx);
        self.udp_frame_rx = Some(frame_rx);
        // The lane owns the socket, crypto boxes, readiness, and endpoint
        // state exclusively (spec §5); decoded frames are handed back over
        // `frame_tx`, a "capability to notify" with no reference to `self`.
        tokio::spawn(run_udp_lane(engine, udp_cmd_rx, frame_tx));
    }

    async fn do_obtain_ip(&mut self) -> Result<NetworkParameters, SessionError> {
        self.require_state(SessionState::Established).await?;

        let mut dhcp = self
            .dhcp
            .take()
            .unwrap_or_else(|| DhcpClient::new(self.mac));
        let mut framer = StreamFramer::new();
        let mut ticker = interval(TICK_INTERVAL);
        let mut buf = [0u8; 4096];

        let initial = dhcp.start();
        if let Some(params) = self.drive_dhcp_event(initial, &mut dhcp).await? {
            self.dhcp = Some(dhcp);
            self.network = Some(params.clone());
            return Ok(params);
        }

        loop {
            let channel = self
                .control
                .as_mut()
                .ok_or_else(|| SessionError::BadState("not connected".to_string()))?;
            tokio::select! {
                read_result = channel.read(&mut buf) => {
                    let n = read_result?;
                    if n == 0 {
                        return Err(SessionError::TransportClosed);
                    }
                    let frames = framer.feed(&buf[..n]).map_err(|e| {
                        SessionError::Handshake(HandshakeError::Io(e.to_string()))
                    })?;
                    for Frame::Data(payload) in frames {
                        let event = dhcp.on_frame(&payload);
                        if let Some(params) = self.drive_dhcp_event(event, &mut dhcp).await? {
                            self.dhcp = Some(dhcp);
                            self.network = Some(params.clone());
                            return Ok(params);
                        }
                    }
                }
                _ = ticker.tick() => {
                    let event = dhcp.on_tick(TICK_INTERVAL);
                    if let Some(params) = self.drive_dhcp_event(event, &mut dhcp).await? {
                        self.dhcp = Some(dhcp);
                        self.network = Some(params.clone());
                        return Ok(params);
                    }
                }
            }
        }
    }

    /// Apply one `DhcpEvent`: send any pending frame over TCP, and return
    /// `Some(params)` once a lease is bound.
    async fn drive_dhcp_event(
        &mut self,
        event: DhcpEvent,
        _dhcp: &mut DhcpClient,
    ) -> Result<Option<NetworkParameters>, SessionError> {
        match event {
            DhcpEvent::None => Ok(None),
            DhcpEvent::Send(frame) => {
                self.write_tcp_frame(&frame).await?;
                Ok(None)
            }
            DhcpEvent::Bound(params) | DhcpEvent::Renewed(params) => Ok(Some(params)),
            DhcpEvent::Failed(e) => Err(SessionError::Dhcp(e)),
        }
    }

    async fn write_tcp_frame(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        let channel = self
            .control
            .as_mut()
            .ok_or_else(|| SessionError::BadState("not connected".to_string()))?;
        channel.write_all(&StreamFramer::encode_single(frame)).await?;
        let mut stats = self.stats.lock().await;
        stats.bytes_sent += frame.len() as u64;
        stats.packets_sent += 1;
        Ok(())
    }

    async fn do_start_tunneling(
        &mut self,
        _flow: Arc<dyn HostFlow>,
        settings: Arc<dyn SettingsApplier>,
    ) -> Result<(), SessionError> {
        self.require_state(SessionState::Established).await?;
        let network = self
            .network
            .clone()
            .ok_or_else(|| SessionError::BadState("no dhcp lease bound yet".to_string()))?;

        let settings_to_apply = NetworkSettings {
            remote_address: network.router.unwrap_or(network.ip),
            ipv4_addresses: vec![network.ip],
            ipv4_masks: vec![network.subnet_mask],
            router: network.router,
            included_routes: vec!["default"],
            dns_servers: network.dns.into_iter().map(std::net::IpAddr::V4).collect(),
            dns_match_domains: vec![String::new()],
            mtu: DEFAULT_MTU,
        };
        settings
            .apply(settings_to_apply)
            .await
            .map_err(|e| SessionError::NeSettingsApplyFailed(e.to_string()))?;

        let mut arp = ArpResolver::new(network.ip, self.mac);
        let gratuitous = arp.start();
        self.arp = Some(arp);
        self.write_tcp_frame(&gratuitous).await?;

        let mut stats = self.stats.lock().await;
        stats.started_at = Some(Instant::now());
        drop(stats);

        *self.state.write().await = SessionState::Tunneling;
        Ok(())
    }

    /// The bidirectional pump plus every per-tick subsystem (spec §4.10,
    /// §4.11), run until `Stop` is received or the transport closes.
    async fn run_tunnel_loop(&mut self, cmd_rx: &mut mpsc::Receiver<Command>, flow: Arc<dyn HostFlow>) {
        let mut framer = StreamFramer::new();
        let mut tcp_read_buf = [0u8; 4096];
        let mut tick = interval(TICK_INTERVAL);
        let mut ka_deadline = tokio::time::Instant::now() + random_tcp_keepalive_delay();

        loop {
            let control_available = self.control.is_some();
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Stop(reply)) => {
                            self.do_stop(None).await;
                            let _ = reply.send(());
                            return;
                        }
                        Some(Command::HandleAppMessage(command, reply)) => {
                            let _ = reply.send(self.dispatch_app_message(&command));
                        }
                        Some(_other) => {
                            // Connect/Handshake/ObtainIp/StartTunneling are
                            // invalid once tunneling; BadState is implicit
                            // since this loop never replies to them.
                        }
                        None => {
                            self.do_stop(None).await;
                            return;
                        }
                    }
                }
                read_result = async { self.control.as_mut().unwrap().read(&mut tcp_read_buf).await }, if control_available => {
                    match read_result {
                        Ok(0) => {
                            self.fail(SessionError::TransportClosed.to_string()).await;
                            return;
                        }
                        Ok(n) => {
                            let mut stats = self.stats.lock().await;
                            stats.bytes_received += n as u64;
                            drop(stats);
                            match framer.feed(&tcp_read_buf[..n]) {
                                Ok(frames) => {
                                    for Frame::Data(payload) in frames {
                                        self.handle_inbound_ethernet(&payload, &flow).await;
                                    }
                                }
                                Err(e) => log::warn!("dropping malformed tcp stream data: {e}"),
                            }
                        }
                        Err(e) => {
                            self.fail(e.to_string()).await;
                            return;
                        }
                    }
                }
                maybe_payload = async {
                    match self.udp_frame_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some(payload) = maybe_payload {
                        self.handle_inbound_ethernet(&payload, &flow).await;
                    }
                }
                _ = tick.tick() => {
                    self.on_tick(&flow).await;
                }
                _ = tokio::time::sleep_until(ka_deadline) => {
                    if let Err(e) = self.send_tcp_keepalive().await {
                        log::warn!("tcp keep-alive send failed: {e}");
                    }
                    ka_deadline = tokio::time::Instant::now() + random_tcp_keepalive_delay();
                }
                packets = flow.read_packets() => {
                    match packets {
                        Ok(packets) => self.pump_outbound(packets).await,
                        Err(e) => log::warn!("host flow read error: {e}"),
                    }
                }
            }
        }
    }

    async fn on_tick(&mut self, _flow: &Arc<dyn HostFlow>) {
        if let Some(mut dhcp) = self.dhcp.take() {
            let event = dhcp.on_tick(TICK_INTERVAL);
            if let Err(e) = self.apply_ticked_dhcp_event(event).await {
                log::warn!("dhcp renewal error: {e}");
            }
            self.dhcp = Some(dhcp);
        }
        if let Some(mut arp) = self.arp.take() {
            if let Some(frame) = arp.on_tick(TICK_INTERVAL) {
                if let Err(e) = self.send_ethernet_frame(frame).await {
                    log::warn!("gratuitous arp send failed: {e}");
                }
            }
            self.arp = Some(arp);
        }
    }

    async fn apply_ticked_dhcp_event(&mut self, event: DhcpEvent) -> Result<(), SessionError> {
        match event {
            DhcpEvent::None => Ok(()),
            DhcpEvent::Send(frame) => self.write_tcp_frame(&frame).await,
            DhcpEvent::Renewed(params) | DhcpEvent::Bound(params) => {
                self.network = Some(params);
                Ok(())
            }
            DhcpEvent::Failed(e) => {
                // A renewal failure is non-fatal per spec §7's propagation
                // policy: the lease simply goes stale, it doesn't tear down
                // the tunnel.
                log::warn!("dhcp renewal failed: {e}");
                Ok(())
            }
        }
    }

    async fn handle_inbound_ethernet(&mut self, raw: &[u8], flow: &Arc<dyn HostFlow>) {
        {
            let mut stats = self.stats.lock().await;
            stats.packets_received += 1;
        }

        if let Some(mut arp) = self.arp.take() {
            if let Some(reply) = arp.on_incoming(raw) {
                if let Err(e) = self.send_ethernet_frame(reply).await {
                    log::warn!("arp reply send failed: {e}");
                }
            }
            self.arp = Some(arp);
        }

        if let Some(mut dhcp) = self.dhcp.take() {
            let event = dhcp.on_frame(raw);
            if let Err(e) = self.apply_ticked_dhcp_event(event).await {
                log::warn!("dhcp frame handling error: {e}");
            }
            self.dhcp = Some(dhcp);
        }

        match pumps::classify_inbound(raw) {
            InboundClassification::Ipv4(bytes) => {
                let packet = HostPacket { protocol: L3Protocol::Ipv4, bytes };
                if let Err(e) = flow.write_packets(vec![packet]).await {
                    log::warn!("host flow write error: {e}");
                }
            }
            InboundClassification::Ipv6(bytes) => {
                let packet = HostPacket { protocol: L3Protocol::Ipv6, bytes };
                if let Err(e) = flow.write_packets(vec![packet]).await {
                    log::warn!("host flow write error: {e}");
                }
            }
            InboundClassification::Arp(_) | InboundClassification::Ignored => {}
        }
    }

    async fn pump_outbound(&mut self, packets: Vec<HostPacket>) {
        for packet in packets {
            match packet.protocol {
                L3Protocol::Ipv6 => {
                    log::debug!("ipv6 data plane is not forwarded");
                    continue;
                }
                L3Protocol::Ipv4 => {
                    let Some(dst) = pumps::outbound_ipv4_dst(&packet.bytes) else {
                        log::warn!("dropping unparseable outbound ipv4 packet");
                        continue;
                    };
                    let (my_ip, mask, gateway) = match &self.network {
                        Some(n) => (n.ip, n.subnet_mask, n.router.unwrap_or(dst)),
                        None => continue,
                    };
                    let target = pumps::next_hop(dst, my_ip, mask, gateway);

                    let resolved = self.arp.as_ref().and_then(|a| a.resolve(target));
                    if resolved.is_none() {
                        if let Some(arp) = self.arp.as_mut() {
                            if let Some(request_frame) = arp.request(target) {
                                if let Err(e) = self.send_ethernet_frame(request_frame).await {
                                    log::warn!("arp request send failed: {e}");
                                }
                            }
                        }
                    }

                    let frame = pumps::wrap_outbound_ipv4(&packet.bytes, self.mac, resolved);
                    if let Err(e) = self.send_ethernet_frame(frame).await {
                        log::warn!("outbound packet send failed: {e}");
                    }
                }
            }
        }
    }

    /// Send one already-framed Ethernet frame: over UDP if the
    /// acceleration data path is ready, otherwise over TCP (spec §4.8
    /// "Send/receive contract").
    async fn send_ethernet_frame(&mut self, frame: Vec<u8>) -> Result<(), SessionError> {
        if let Some(udp_tx) = &self.udp_cmd_tx {
            let (reply_tx, reply_rx) = oneshot::channel();
            if udp_tx
                .send(UdpCommand::TrySend(frame.clone(), reply_tx))
                .await
                .is_ok()
            {
                if let Ok(true) = reply_rx.await {
                    let mut stats = self.stats.lock().await;
                    stats.bytes_sent += frame.len() as u64;
                    stats.packets_sent += 1;
                    return Ok(());
                }
            }
        }
        self.write_tcp_frame(&frame).await
    }

    async fn send_tcp_keepalive(&mut self) -> Result<(), SessionError> {
        if !matches!(*self.state.read().await, SessionState::Tunneling) {
            return Ok(());
        }
        let mut rng = rand::thread_rng();
        let mut payload = vec![0u8; (rng.next_u32() % 512) as usize];
        rng.fill_bytes(&mut payload);
        let channel = self
            .control
            .as_mut()
            .ok_or_else(|| SessionError::BadState("not connected".to_string()))?;
        channel
            .write_all(&StreamFramer::encode_keep_alive(&payload))
            .await?;
        Ok(())
    }

    /// Spec §6 "App-message handler": `"dhcp_status"` replies with a JSON
    /// blob describing the current lease; unknown commands reply empty.
    fn dispatch_app_message(&self, command: &str) -> Vec<u8> {
        if command != "dhcp_status" {
            return Vec::new();
        }
        let Some(network) = &self.network else {
            return Vec::new();
        };
        let payload = serde_json::json!({
            "type": "dhcp_info",
            "payload": {
                "assigned_ip": network.ip.to_string(),
                "subnet_mask": network.subnet_mask.to_string(),
                "gateway": network.router.map(|r| r.to_string()),
                "dns": network.dns.map(|d| vec![d.to_string()]).unwrap_or_default(),
                "mtu": DEFAULT_MTU,
            }
        });
        serde_json::to_vec(&payload).unwrap_or_default()
    }
}

fn random_tcp_keepalive_delay() -> Duration {
    let jitter = rand::thread_rng().next_u32() % 10_001; // 0..=10000
    Duration::from_millis(10_000 + jitter as u64)
}

/// The UDP I/O lane (spec §5's second lane): owns the socket, the crypto
/// boxes, and the readiness/endpoint state exclusively. Inbound Ethernet
/// payloads are a "capability to notify" forwarded to whoever is listening;
/// this function intentionally has no reference back to `Session`.
async fn run_udp_lane(
    mut engine: UdpAccelEngine,
    mut cmd_rx: mpsc::Receiver<UdpCommand>,
    frame_tx: mpsc::Sender<Vec<u8>>,
) {
    let mut keepalive_deadline = tokio::time::Instant::now() + engine.next_keepalive_delay();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UdpCommand::TrySend(payload, reply)) => {
                        let sent = engine.try_send(&payload).await.unwrap_or(false);
                        let _ = reply.send(sent);
                    }
                    Some(UdpCommand::Stop) | None => return,
                }
            }
            _ = tokio::time::sleep_until(keepalive_deadline) => {
                if let Err(e) = engine.send_keepalive_cycle().await {
                    log::warn!("udp keep-alive send failed: {e}");
                }
                keepalive_deadline = tokio::time::Instant::now() + engine.next_keepalive_delay();
            }
            received = engine.recv_next() => {
                match received {
                    Ok(Some(payload)) => {
                        if frame_tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("udp datagram receive error: {e}"),
                }
            }
        }
    }
}
