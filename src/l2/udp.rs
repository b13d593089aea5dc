//! UDP header builder/parser over IPv4 (spec §4.6). Checksum is left at
//! zero, which IPv4 permits.

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

impl UdpDatagram {
    pub fn encode(&self) -> Vec<u8> {
        let len = HEADER_LEN + self.payload.len();
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&(len as u16).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // checksum
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let src_port = u16::from_be_bytes([data[0], data[1]]);
        let dst_port = u16::from_be_bytes([data[2], data[3]]);
        let len = u16::from_be_bytes([data[4], data[5]]) as usize;
        if len > data.len() || len < HEADER_LEN {
            return None;
        }
        Some(UdpDatagram {
            src_port,
            dst_port,
            payload: data[HEADER_LEN..len].to_vec(),
        })
    }
}
