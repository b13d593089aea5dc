//! ChaCha20-Poly1305 AEAD sealing/opening and nonce evolution for UDP
//! acceleration v2 (spec §4.8).
//!
//! Keys are pre-shared (exchanged inside the Pack handshake), so there is no
//! DH/Noise step here — just seal/open with evolving nonces.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::SessionError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// The plaintext envelope carried inside the AEAD payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPlaneMessage {
    pub cookie: u32,
    pub my_tick: u64,
    pub your_tick: u64,
    pub payload: Vec<u8>,
}

impl DataPlaneMessage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 8 + 8 + 2 + 1 + self.payload.len());
        out.extend_from_slice(&self.cookie.to_be_bytes());
        out.extend_from_slice(&self.my_tick.to_be_bytes());
        out.extend_from_slice(&self.your_tick.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.push(0); // flag, unused beyond framing
        out.extend_from_slice(&self.payload);
        out
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 4 + 8 + 8 + 2 + 1 {
            return None;
        }
        let cookie = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let my_tick = u64::from_be_bytes(data[4..12].try_into().unwrap());
        let your_tick = u64::from_be_bytes(data[12..20].try_into().unwrap());
        let payload_size = u16::from_be_bytes(data[20..22].try_into().unwrap()) as usize;
        let payload_start = 23;
        if data.len() < payload_start + payload_size {
            return None;
        }
        Some(DataPlaneMessage {
            cookie,
            my_tick,
            your_tick,
            payload: data[payload_start..payload_start + payload_size].to_vec(),
        })
    }
}

/// One direction of the AEAD session: a fixed key plus an evolving nonce.
pub struct CryptoBox {
    cipher: ChaCha20Poly1305,
    nonce: [u8; NONCE_LEN],
}

impl CryptoBox {
    /// `key` must be at least 32 bytes (the first 32 bytes of `clientKeyV2`
    /// or `serverKeyV2`); `initial_nonce` is the first 12 random bytes.
    pub fn new(key: &[u8], initial_nonce: [u8; NONCE_LEN]) -> Result<Self, SessionError> {
        if key.len() < 32 {
            return Err(SessionError::BadState(format!(
                "udp accel key too short: {} bytes",
                key.len()
            )));
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..32]));
        Ok(Self {
            cipher,
            nonce: initial_nonce,
        })
    }

    /// Seal a data-plane message. Returns the full wire packet
    /// `nonce(12) || ciphertext || tag(16)` and advances the nonce per the
    /// chaining rule.
    pub fn seal(&mut self, message: &DataPlaneMessage) -> Result<Vec<u8>, SessionError> {
        let plaintext = message.encode();
        let nonce_used = self.nonce;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_used), plaintext.as_ref())
            .map_err(|_| SessionError::BadState("udp accel seal failed".to_string()))?;

        self.advance_nonce(&ciphertext);

        let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wire.extend_from_slice(&nonce_used);
        wire.extend_from_slice(&ciphertext);
        Ok(wire)
    }

    /// Open a received wire packet. The nonce is taken from its own prefix,
    /// so no sender-side state is needed to decrypt (only our own evolving
    /// send-nonce is advanced here).
    pub fn open(wire: &[u8], cipher: &ChaCha20Poly1305) -> Option<DataPlaneMessage> {
        if wire.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .ok()?;
        DataPlaneMessage::decode(&plaintext)
    }

    pub fn receive_cipher(key: &[u8]) -> Result<ChaCha20Poly1305, SessionError> {
        if key.len() < 32 {
            return Err(SessionError::BadState(format!(
                "udp accel key too short: {} bytes",
                key.len()
            )));
        }
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..32])))
    }

    /// Chain the next send nonce from `ciphertext` if it's at least 12 bytes
    /// long; otherwise increment the current nonce as a 96-bit big-endian
    /// counter.
    fn advance_nonce(&mut self, ciphertext: &[u8]) {
        if ciphertext.len() >= NONCE_LEN {
            self.nonce.copy_from_slice(&ciphertext[..NONCE_LEN]);
        } else {
            increment_be(&mut self.nonce);
        }
    }
}

fn increment_be(nonce: &mut [u8; NONCE_LEN]) {
    for byte in nonce.iter_mut().rev() {
        let (value, overflow) = byte.overflowing_add(1);
        *byte = value;
        if !overflow {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> Vec<u8> {
        vec![fill; 32]
    }

    #[test]
    fn seal_then_open_round_trips() {
        let mut send_box = CryptoBox::new(&key(1), [0u8; NONCE_LEN]).unwrap();
        let recv_cipher = CryptoBox::receive_cipher(&key(1)).unwrap();

        let message = DataPlaneMessage {
            cookie: 0xAABBCCDD,
            my_tick: 1000,
            your_tick: 500,
            payload: b"hello tunnel".to_vec(),
        };
        let wire = send_box.seal(&message).unwrap();
        let opened = CryptoBox::open(&wire, &recv_cipher).unwrap();
        assert_eq!(opened, message);
    }

    #[test]
    fn nonce_chains_from_ciphertext_prefix() {
        let mut send_box = CryptoBox::new(&key(2), [7u8; NONCE_LEN]).unwrap();
        let message = DataPlaneMessage {
            cookie: 1,
            my_tick: 1,
            your_tick: 0,
            payload: vec![],
        };
        let wire1 = send_box.seal(&message).unwrap();
        let ciphertext1 = &wire1[NONCE_LEN..];
        assert_eq!(&send_box.nonce, &ciphertext1[..NONCE_LEN]);

        let wire2 = send_box.seal(&message).unwrap();
        // Nonces across successive packets must differ.
        assert_ne!(&wire1[..NONCE_LEN], &wire2[..NONCE_LEN]);
    }

    #[test]
    fn increment_be_wraps_correctly() {
        let mut nonce = [0xFFu8; NONCE_LEN];
        increment_be(&mut nonce);
        assert_eq!(nonce, [0u8; NONCE_LEN]);

        let mut nonce2 = [0u8; NONCE_LEN];
        increment_be(&mut nonce2);
        let mut expected = [0u8; NONCE_LEN];
        expected[NONCE_LEN - 1] = 1;
        assert_eq!(nonce2, expected);
    }

    #[test]
    fn new_rejects_short_key() {
        assert!(CryptoBox::new(&[0u8; 16], [0u8; NONCE_LEN]).is_err());
    }
}
