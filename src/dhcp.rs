//! Embedded DHCP client (spec §4.7): DISCOVER/REQUEST cycle run over the
//! framed TCP stream, driven by an external 1 Hz tick rather than its own
//! timer task (the whole session lane shares one clock source).

use std::net::Ipv4Addr;
use std::time::Duration;

use rand::RngCore;

use crate::error::DhcpError;
use crate::l2::dhcp_packet::{self, DhcpMessageType, DhcpRequestParams, DhcpResponse};
use crate::l2::{arp_packet, ethernet, ipv4, udp};
use crate::mac::MacAddr;

const RESEND_INTERVAL: Duration = Duration::from_secs(3);
const MAX_RETRIES: u32 = 4;

/// Final bound configuration, handed to the caller on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParameters {
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub router: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
    pub lease_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    SendingDiscover,
    WaitingOffer,
    WaitingAck,
    Bound,
    Renewing,
}

/// Outcome of feeding one incoming Ethernet frame or tick to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpEvent {
    /// Nothing externally visible happened.
    None,
    /// A frame the client wants to send (already wrapped as Ethernet).
    Send(Vec<u8>),
    /// The lease was bound for the first time.
    Bound(NetworkParameters),
    /// An existing lease was renewed.
    Renewed(NetworkParameters),
    /// The client gave up.
    Failed(DhcpError),
}

pub struct DhcpClient {
    state: State,
    mac: MacAddr,
    xid: u32,
    server_id: Option<Ipv4Addr>,
    lease: Option<NetworkParameters>,
    elapsed_in_phase: Duration,
    retries_in_phase: u32,
    elapsed_since_bound: Duration,
}

impl DhcpClient {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            state: State::Idle,
            mac,
            xid: 0,
            server_id: None,
            lease: None,
            elapsed_in_phase: Duration::ZERO,
            retries_in_phase: 0,
            elapsed_since_bound: Duration::ZERO,
        }
    }

    /// Start (or restart) a DISCOVER cycle, clearing any prior lease.
    pub fn start(&mut self) -> DhcpEvent {
        self.lease = None;
        self.server_id = None;
        self.xid = rand::thread_rng().next_u32();
        self.elapsed_in_phase = Duration::ZERO;
        self.retries_in_phase = 0;
        self.state = State::SendingDiscover;
        self.emit_discover()
    }

    fn emit_discover(&mut self) -> DhcpEvent {
        self.state = State::WaitingOffer;
        let frame = self.wrap_request(DhcpRequestParams {
            message_type: DhcpMessageType::Discover,
            xid: self.xid,
            client_mac: self.mac,
            requested_ip: None,
            server_id: None,
        });
        DhcpEvent::Send(frame)
    }

    fn emit_request(&mut self, requested_ip: Ipv4Addr) -> DhcpEvent {
        let frame = self.wrap_request(DhcpRequestParams {
            message_type: DhcpMessageType::Request,
            xid: self.xid,
            client_mac: self.mac,
            requested_ip: Some(requested_ip),
            server_id: self.server_id,
        });
        DhcpEvent::Send(frame)
    }

    fn wrap_request(&self, params: DhcpRequestParams) -> Vec<u8> {
        let dhcp_payload = dhcp_packet::encode_request(&params);
        let udp_datagram = udp::UdpDatagram {
            src_port: dhcp_packet::CLIENT_PORT,
            dst_port: dhcp_packet::SERVER_PORT,
            payload: dhcp_payload,
        }
        .encode();
        let ip_packet = ipv4::Ipv4Packet {
            protocol: ipv4::PROTOCOL_UDP,
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::BROADCAST,
            payload: udp_datagram,
        }
        .encode();
        ethernet::EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: self.mac,
            ethertype: ethernet::ETHERTYPE_IPV4,
            payload: ip_packet,
        }
        .encode()
    }

    /// Feed a decoded Ethernet frame to the client. Frames not addressed to
    /// DHCP (wrong ports, missing magic cookie, XID mismatch) are ignored.
    pub fn on_frame(&mut self, frame: &[u8]) -> DhcpEvent {
        let Some(eth) = ethernet::EthernetFrame::decode(frame) else {
            return DhcpEvent::None;
        };
        if eth.ethertype != ethernet::ETHERTYPE_IPV4 {
            return DhcpEvent::None;
        }
        let Some(ip) = ipv4::Ipv4Packet::decode(&eth.payload) else {
            return DhcpEvent::None;
        };
        if ip.protocol != ipv4::PROTOCOL_UDP {
            return DhcpEvent::None;
        }
        let Some(dgram) = udp::UdpDatagram::decode(&ip.payload) else {
            return DhcpEvent::None;
        };
        if !(dgram.src_port == dhcp_packet::SERVER_PORT && dgram.dst_port == dhcp_packet::CLIENT_PORT) {
            return DhcpEvent::None;
        }
        let Some(response) = dhcp_packet::decode_response(&dgram.payload) else {
            return DhcpEvent::None;
        };
        if response.xid != self.xid {
            return DhcpEvent::None;
        }

        self.handle_response(response)
    }

    fn handle_response(&mut self, response: DhcpResponse) -> DhcpEvent {
        match (self.state, response.message_type) {
            (State::WaitingOffer, DhcpMessageType::Offer) => {
                self.server_id = response.server_id;
                self.elapsed_in_phase = Duration::ZERO;
                self.retries_in_phase = 0;
                self.state = State::WaitingAck;
                self.emit_request(response.yiaddr)
            }
            (State::WaitingAck, DhcpMessageType::Ack) | (State::Renewing, DhcpMessageType::Ack) => {
                let was_initial = self.state == State::WaitingAck;
                let Some(subnet_mask) = response.subnet_mask else {
                    self.state = State::Idle;
                    return DhcpEvent::Failed(DhcpError::IncompleteConfig);
                };
                let Some(lease_secs) = response.lease_time else {
                    self.state = State::Idle;
                    return DhcpEvent::Failed(DhcpError::IncompleteConfig);
                };

                let params = NetworkParameters {
                    ip: response.yiaddr,
                    subnet_mask,
                    router: response.router,
                    dns: response.dns,
                    lease_time: Duration::from_secs(lease_secs as u64),
                };
                self.lease = Some(params.clone());
                self.elapsed_since_bound = Duration::ZERO;
                self.state = State::Bound;

                if was_initial {
                    DhcpEvent::Bound(params)
                } else {
                    DhcpEvent::Renewed(params)
                }
            }
            (State::WaitingAck, DhcpMessageType::Nak) | (State::Renewing, DhcpMessageType::Nak) => {
                self.lease = None;
                self.start()
            }
            _ => DhcpEvent::None,
        }
    }

    /// Advance the client's clock by one tick (spec: 1 Hz). May trigger a
    /// resend, a timeout, or a renewal.
    pub fn on_tick(&mut self, dt: Duration) -> DhcpEvent {
        match self.state {
            State::WaitingOffer | State::WaitingAck => {
                self.elapsed_in_phase += dt;
                if self.elapsed_in_phase < RESEND_INTERVAL {
                    return DhcpEvent::None;
                }
                self.elapsed_in_phase = Duration::ZERO;
                self.retries_in_phase += 1;
                if self.retries_in_phase > MAX_RETRIES {
                    self.state = State::Idle;
                    return DhcpEvent::Failed(DhcpError::Timeout);
                }
                match self.state {
                    State::WaitingOffer => self.emit_discover(),
                    State::WaitingAck => {
                        let Some(requested) = self.lease.as_ref().map(|l| l.ip) else {
                            // We don't yet have yiaddr cached separately from
                            // the lease; re-discover rather than resend blind.
                            return self.start();
                        };
                        self.emit_request(requested)
                    }
                    _ => unreachable!(),
                }
            }
            State::Bound => {
                self.elapsed_since_bound += dt;
                let Some(lease) = &self.lease else {
                    return DhcpEvent::None;
                };
                if self.elapsed_since_bound.as_secs_f64() >= 0.5 * lease.lease_time.as_secs_f64() {
                    let requested = lease.ip;
                    self.elapsed_in_phase = Duration::ZERO;
                    self.retries_in_phase = 0;
                    self.state = State::Renewing;
                    self.emit_request(requested)
                } else {
                    DhcpEvent::None
                }
            }
            State::Renewing => {
                self.elapsed_in_phase += dt;
                if self.elapsed_in_phase < RESEND_INTERVAL {
                    return DhcpEvent::None;
                }
                self.elapsed_in_phase = Duration::ZERO;
                self.retries_in_phase += 1;
                if self.retries_in_phase > MAX_RETRIES {
                    self.state = State::Idle;
                    return DhcpEvent::Failed(DhcpError::Timeout);
                }
                let requested = self.lease.as_ref().map(|l| l.ip);
                match requested {
                    Some(ip) => self.emit_request(ip),
                    None => DhcpEvent::None,
                }
            }
            State::Idle | State::SendingDiscover => DhcpEvent::None,
        }
    }
}

/// Build an ARP-shaped gratuitous reply to answer an ARP request addressed
/// to `my_ip` from the DHCP client's own MAC. Kept here rather than in
/// `arp_resolver` because the DHCP client owns "am I answering for this IP"
/// only until tunneling starts and the resolver takes over.
#[allow(dead_code)]
fn is_arp_request_for(payload: &[u8], my_ip: Ipv4Addr) -> bool {
    arp_packet::ArpPacket::decode(payload)
        .map(|arp| arp.operation == arp_packet::OP_REQUEST && arp.target_ip == my_ip)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer_frame(xid: u32, mac: MacAddr, yiaddr: Ipv4Addr) -> Vec<u8> {
        response_frame(xid, mac, yiaddr, DhcpMessageType::Offer, true)
    }

    fn ack_frame(xid: u32, mac: MacAddr, yiaddr: Ipv4Addr) -> Vec<u8> {
        response_frame(xid, mac, yiaddr, DhcpMessageType::Ack, true)
    }

    fn response_frame(
        xid: u32,
        mac: MacAddr,
        yiaddr: Ipv4Addr,
        msg_type: DhcpMessageType,
        include_lease_fields: bool,
    ) -> Vec<u8> {
        let mut bootp = vec![0u8; 236];
        bootp[0] = 2;
        bootp[4..8].copy_from_slice(&xid.to_be_bytes());
        bootp[16..20].copy_from_slice(&yiaddr.octets());
        bootp.extend_from_slice(&[0x63, 0x82, 0x53, 0x63]);
        bootp.push(53);
        bootp.push(1);
        bootp.push(msg_type as u8);
        bootp.push(54);
        bootp.push(4);
        bootp.extend_from_slice(&[10, 0, 0, 1]);
        if include_lease_fields {
            bootp.push(1); // subnet mask
            bootp.push(4);
            bootp.extend_from_slice(&[255, 255, 255, 0]);
            bootp.push(51); // lease time
            bootp.push(4);
            bootp.extend_from_slice(&600u32.to_be_bytes());
        }
        bootp.push(255);

        let udp = udp::UdpDatagram {
            src_port: 67,
            dst_port: 68,
            payload: bootp,
        }
        .encode();
        let ip = ipv4::Ipv4Packet {
            protocol: ipv4::PROTOCOL_UDP,
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::BROADCAST,
            payload: udp,
        }
        .encode();
        ethernet::EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: MacAddr([9, 9, 9, 9, 9, 9]),
            ethertype: ethernet::ETHERTYPE_IPV4,
            payload: ip,
        }
        .encode()
    }

    /// S2: DHCP happy path — start, OFFER, ACK, ends Bound.
    #[test]
    fn happy_path_discover_offer_request_ack() {
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let mut client = DhcpClient::new(mac);

        let discover_event = client.start();
        assert!(matches!(discover_event, DhcpEvent::Send(_)));
        assert_eq!(client.state, State::WaitingOffer);

        let xid = client.xid;
        let offer = offer_frame(xid, mac, Ipv4Addr::new(192, 168, 1, 50));
        let request_event = client.on_frame(&offer);
        assert!(matches!(request_event, DhcpEvent::Send(_)));
        assert_eq!(client.state, State::WaitingAck);

        let ack = ack_frame(xid, mac, Ipv4Addr::new(192, 168, 1, 50));
        let bound_event = client.on_frame(&ack);
        match bound_event {
            DhcpEvent::Bound(params) => {
                assert_eq!(params.ip, Ipv4Addr::new(192, 168, 1, 50));
                assert_eq!(params.subnet_mask, Ipv4Addr::new(255, 255, 255, 0));
                assert_eq!(params.lease_time, Duration::from_secs(600));
            }
            other => panic!("expected Bound, got {other:?}"),
        }
        assert_eq!(client.state, State::Bound);
    }

    #[test]
    fn nak_restarts_from_discover() {
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let mut client = DhcpClient::new(mac);
        client.start();
        let xid = client.xid;
        client.on_frame(&offer_frame(xid, mac, Ipv4Addr::new(192, 168, 1, 50)));

        let nak = response_frame(
            xid,
            mac,
            Ipv4Addr::UNSPECIFIED,
            DhcpMessageType::Nak,
            false,
        );
        let event = client.on_frame(&nak);
        assert!(matches!(event, DhcpEvent::Send(_)));
        assert_eq!(client.state, State::WaitingOffer);
        assert_ne!(client.xid, xid, "restart must pick a fresh xid");
    }

    #[test]
    fn exceeding_retry_budget_times_out() {
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let mut client = DhcpClient::new(mac);
        client.start();

        let mut last_event = DhcpEvent::None;
        for _ in 0..(MAX_RETRIES + 1) {
            last_event = client.on_tick(RESEND_INTERVAL);
        }
        assert_eq!(last_event, DhcpEvent::Failed(DhcpError::Timeout));
    }

    #[test]
    fn renewal_fires_at_half_lease_time() {
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let mut client = DhcpClient::new(mac);
        client.start();
        let xid = client.xid;
        client.on_frame(&offer_frame(xid, mac, Ipv4Addr::new(192, 168, 1, 50)));
        client.on_frame(&ack_frame(xid, mac, Ipv4Addr::new(192, 168, 1, 50)));
        assert_eq!(client.state, State::Bound);

        let event = client.on_tick(Duration::from_secs(301));
        assert!(matches!(event, DhcpEvent::Send(_)));
        assert_eq!(client.state, State::Renewing);

        let renew_ack = ack_frame(xid, mac, Ipv4Addr::new(192, 168, 1, 50));
        let renewed = client.on_frame(&renew_ack);
        assert!(matches!(renewed, DhcpEvent::Renewed(_)));
    }

    #[test]
    fn mismatched_xid_is_ignored() {
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let mut client = DhcpClient::new(mac);
        client.start();
        let wrong_offer = offer_frame(client.xid.wrapping_add(1), mac, Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(client.on_frame(&wrong_offer), DhcpEvent::None);
        assert_eq!(client.state, State::WaitingOffer);
    }
}
