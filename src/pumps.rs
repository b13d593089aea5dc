//! Packet pumps (spec §4.10): TUN→server and server→TUN directions, plus
//! the on-link/gateway routing decision shared by both.

use std::net::Ipv4Addr;

use crate::l2::ethernet::{EthernetFrame, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETHERTYPE_IPV6};
use crate::l2::ipv4::Ipv4Packet;
use crate::mac::MacAddr;

/// Decide the next-hop IPv4 address an outbound packet should be ARP'd
/// against: the destination itself if on-link, otherwise the gateway.
pub fn next_hop(dst_ip: Ipv4Addr, my_ip: Ipv4Addr, mask: Ipv4Addr, gateway_ip: Ipv4Addr) -> Ipv4Addr {
    if is_on_link(dst_ip, my_ip, mask) {
        dst_ip
    } else {
        gateway_ip
    }
}

fn is_on_link(dst_ip: Ipv4Addr, my_ip: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let dst = u32::from(dst_ip);
    let mine = u32::from(my_ip);
    let m = u32::from(mask);
    (dst & m) == (mine & m)
}

/// Build the Ethernet frame for an outbound IPv4 packet given the resolved
/// (or best-effort all-zero) destination MAC.
pub fn wrap_outbound_ipv4(raw_ip_packet: &[u8], src_mac: MacAddr, dst_mac: Option<MacAddr>) -> Vec<u8> {
    EthernetFrame {
        dst: dst_mac.unwrap_or(MacAddr::ZERO),
        src: src_mac,
        ethertype: ETHERTYPE_IPV4,
        payload: raw_ip_packet.to_vec(),
    }
    .encode()
}

/// The result of classifying one inbound Ethernet frame from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundClassification {
    Arp(Vec<u8>),
    Ipv4(Vec<u8>),
    Ipv6(Vec<u8>),
    /// Recognized ethertype with no payload worth forwarding, or an
    /// undecodable frame.
    Ignored,
}

/// Classify a decoded Ethernet frame per spec §4.10's "Server→TUN" rules.
/// DHCP routing is handled by the caller feeding the same raw frame to the
/// DHCP client independently while it's active — this function only
/// decides the HostFlow/ARP dispatch.
pub fn classify_inbound(frame: &[u8]) -> InboundClassification {
    let Some(eth) = EthernetFrame::decode(frame) else {
        return InboundClassification::Ignored;
    };
    match eth.ethertype {
        ETHERTYPE_ARP => InboundClassification::Arp(eth.payload),
        ETHERTYPE_IPV4 => InboundClassification::Ipv4(eth.payload),
        ETHERTYPE_IPV6 => InboundClassification::Ipv6(eth.payload),
        _ => InboundClassification::Ignored,
    }
}

/// Extract the destination IPv4 address from a raw (unframed) IPv4 packet,
/// used by the TUN→server pump to decide routing before framing.
pub fn outbound_ipv4_dst(raw_ip_packet: &[u8]) -> Option<Ipv4Addr> {
    Ipv4Packet::decode(raw_ip_packet).map(|p| p.dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S4: on-link vs gateway routing.
    #[test]
    fn on_link_destination_is_arped_directly() {
        let my_ip = Ipv4Addr::new(10, 0, 0, 5);
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let gateway = Ipv4Addr::new(10, 0, 0, 1);

        assert_eq!(
            next_hop(Ipv4Addr::new(10, 0, 0, 9), my_ip, mask, gateway),
            Ipv4Addr::new(10, 0, 0, 9)
        );
    }

    #[test]
    fn off_link_destination_routes_via_gateway() {
        let my_ip = Ipv4Addr::new(10, 0, 0, 5);
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let gateway = Ipv4Addr::new(10, 0, 0, 1);

        assert_eq!(
            next_hop(Ipv4Addr::new(8, 8, 8, 8), my_ip, mask, gateway),
            gateway
        );
    }

    #[test]
    fn unresolved_mac_falls_back_to_zero() {
        let frame = wrap_outbound_ipv4(&[1, 2, 3], MacAddr([1; 6]), None);
        let eth = EthernetFrame::decode(&frame).unwrap();
        assert_eq!(eth.dst, MacAddr::ZERO);
    }

    #[test]
    fn classify_dispatches_by_ethertype() {
        let arp_frame = EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: MacAddr([1; 6]),
            ethertype: ETHERTYPE_ARP,
            payload: vec![0xAA; 28],
        }
        .encode();
        assert!(matches!(
            classify_inbound(&arp_frame),
            InboundClassification::Arp(_)
        ));

        let ipv4_frame = EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: MacAddr([1; 6]),
            ethertype: ETHERTYPE_IPV4,
            payload: vec![1, 2, 3],
        }
        .encode();
        assert!(matches!(
            classify_inbound(&ipv4_frame),
            InboundClassification::Ipv4(_)
        ));
    }
}
