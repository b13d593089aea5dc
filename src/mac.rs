//! Locally-administered MAC address generation for the client identity.

use rand::RngCore;

/// A 6-byte Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
    pub const ZERO: MacAddr = MacAddr([0x00; 6]);

    /// Generate a new locally-administered unicast MAC: bit-0 (multicast) of
    /// the first octet is cleared, bit-1 (locally administered) is set; the
    /// rest of the address is random.
    pub fn generate_local() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] &= !0x01; // unicast
        bytes[0] |= 0x02; // locally administered
        MacAddr(bytes)
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_mac_is_locally_administered_unicast() {
        for _ in 0..64 {
            let mac = MacAddr::generate_local();
            assert_eq!(mac.0[0] & 0x01, 0, "must be unicast");
            assert_eq!(mac.0[0] & 0x02, 0x02, "must be locally administered");
        }
    }

    #[test]
    fn display_formats_lowercase_colon_separated() {
        let mac = MacAddr([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:01");
    }
}
