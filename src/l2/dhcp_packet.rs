//! DHCP/BOOTP wire payload (spec §4.6). Broadcast Ethernet, UDP 68 (client)
//! -> 67 (server).

use std::net::Ipv4Addr;

use crate::mac::MacAddr;

pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;

const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
const BOOTP_HEADER_LEN: usize = 236; // up to and including the 192 zero bytes
const OPT_REQUESTED_IP: u8 = 50;
const OPT_SERVER_ID: u8 = 54;
const OPT_MSG_TYPE: u8 = 53;
const OPT_PARAM_REQUEST_LIST: u8 = 55;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_LEASE_TIME: u8 = 51;
const OPT_END: u8 = 255;

/// The canonical parameter request list this client sends in every
/// DISCOVER/REQUEST.
pub const PARAM_REQUEST_LIST: [u8; 8] = [1, 3, 6, 15, 28, 51, 58, 59];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }
}

/// Fields needed to build an outgoing DISCOVER or REQUEST.
#[derive(Debug, Clone)]
pub struct DhcpRequestParams {
    pub message_type: DhcpMessageType,
    pub xid: u32,
    pub client_mac: MacAddr,
    pub requested_ip: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
}

/// Fields extracted from an incoming OFFER/ACK/NAK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpResponse {
    pub message_type: DhcpMessageType,
    pub xid: u32,
    pub yiaddr: Ipv4Addr,
    pub server_id: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
    pub lease_time: Option<u32>,
}

pub fn encode_request(params: &DhcpRequestParams) -> Vec<u8> {
    let mut out = vec![0u8; BOOTP_HEADER_LEN];
    out[0] = 1; // op = BOOTREQUEST
    out[1] = 1; // htype = Ethernet
    out[2] = 6; // hlen
    out[3] = 0; // hops
    out[4..8].copy_from_slice(&params.xid.to_be_bytes());
    // secs (8..10), flags (10..12) left zero
    // ciaddr/yiaddr/siaddr/giaddr (12..28) left zero
    out[28..34].copy_from_slice(&params.client_mac.0); // chaddr (16 bytes, left-padded with the MAC)
    out[34..236].fill(0); // padding + sname + file, all zero here

    out.extend_from_slice(&MAGIC_COOKIE);

    out.push(OPT_MSG_TYPE);
    out.push(1);
    out.push(params.message_type as u8);

    if let Some(ip) = params.requested_ip {
        out.push(OPT_REQUESTED_IP);
        out.push(4);
        out.extend_from_slice(&ip.octets());
    }
    if let Some(ip) = params.server_id {
        out.push(OPT_SERVER_ID);
        out.push(4);
        out.extend_from_slice(&ip.octets());
    }

    out.push(OPT_PARAM_REQUEST_LIST);
    out.push(PARAM_REQUEST_LIST.len() as u8);
    out.extend_from_slice(&PARAM_REQUEST_LIST);

    out.push(OPT_END);
    out
}

pub fn decode_response(data: &[u8]) -> Option<DhcpResponse> {
    if data.len() < BOOTP_HEADER_LEN + 4 {
        return None;
    }
    if data[0] != 2 {
        return None; // must be BOOTREPLY
    }
    let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let yiaddr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

    if data[BOOTP_HEADER_LEN..BOOTP_HEADER_LEN + 4] != MAGIC_COOKIE {
        return None;
    }

    let mut message_type = None;
    let mut server_id = None;
    let mut subnet_mask = None;
    let mut router = None;
    let mut dns = None;
    let mut lease_time = None;

    let mut pos = BOOTP_HEADER_LEN + 4;
    while pos < data.len() {
        let code = data[pos];
        if code == OPT_END {
            break;
        }
        if pos + 1 >= data.len() {
            break;
        }
        let len = data[pos + 1] as usize;
        let value_start = pos + 2;
        if value_start + len > data.len() {
            break;
        }
        let value = &data[value_start..value_start + len];

        match code {
            OPT_MSG_TYPE if len == 1 => message_type = DhcpMessageType::from_u8(value[0]),
            OPT_SERVER_ID if len == 4 => {
                server_id = Some(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
            }
            OPT_SUBNET_MASK if len == 4 => {
                subnet_mask = Some(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
            }
            OPT_ROUTER if len >= 4 => {
                router = Some(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
            }
            OPT_DNS if len >= 4 => dns = Some(Ipv4Addr::new(value[0], value[1], value[2], value[3])),
            OPT_LEASE_TIME if len == 4 => {
                lease_time = Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
            }
            _ => {}
        }

        pos = value_start + len;
    }

    Some(DhcpResponse {
        message_type: message_type?,
        xid,
        yiaddr,
        server_id,
        subnet_mask,
        router,
        dns,
        lease_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_discover_with_expected_fixed_fields() {
        let params = DhcpRequestParams {
            message_type: DhcpMessageType::Discover,
            xid: 0xDEAD_BEEF,
            client_mac: MacAddr([1, 2, 3, 4, 5, 6]),
            requested_ip: None,
            server_id: None,
        };
        let encoded = encode_request(&params);
        assert_eq!(encoded[0], 1); // BOOTREQUEST
        assert_eq!(&encoded[4..8], &0xDEAD_BEEFu32.to_be_bytes());
        assert_eq!(&encoded[28..34], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&encoded[236..240], &MAGIC_COOKIE);
    }

    #[test]
    fn round_trips_offer_through_decode() {
        let mut raw = vec![0u8; BOOTP_HEADER_LEN];
        raw[0] = 2; // BOOTREPLY
        raw[4..8].copy_from_slice(&42u32.to_be_bytes());
        raw[16..20].copy_from_slice(&[192, 168, 1, 50]);
        raw.extend_from_slice(&MAGIC_COOKIE);
        raw.push(OPT_MSG_TYPE);
        raw.push(1);
        raw.push(DhcpMessageType::Offer as u8);
        raw.push(OPT_SERVER_ID);
        raw.push(4);
        raw.extend_from_slice(&[192, 168, 1, 1]);
        raw.push(OPT_SUBNET_MASK);
        raw.push(4);
        raw.extend_from_slice(&[255, 255, 255, 0]);
        raw.push(OPT_END);

        let response = decode_response(&raw).unwrap();
        assert_eq!(response.message_type, DhcpMessageType::Offer);
        assert_eq!(response.xid, 42);
        assert_eq!(response.yiaddr, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(response.server_id, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(response.subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
    }

    #[test]
    fn decode_rejects_missing_magic_cookie() {
        let mut raw = vec![0u8; BOOTP_HEADER_LEN + 4];
        raw[0] = 2;
        assert!(decode_response(&raw).is_none());
    }
}
