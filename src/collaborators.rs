//! Capability-interface traits the session engine consumes and exposes
//! (spec §6, §9). These replace the source's inheritance-based hooks with
//! composition: the orchestrator holds `Arc<dyn Trait>` handles, never a
//! base class.

use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::SessionError;

/// The L3 protocol tag a packet carries to/from the host flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Protocol {
    Ipv4,
    Ipv6,
}

/// A single packet paired with its protocol, as exchanged with the host.
#[derive(Debug, Clone)]
pub struct HostPacket {
    pub protocol: L3Protocol,
    pub bytes: Vec<u8>,
}

/// The host-side TUN/packet-flow collaborator (spec §6 "Host flow").
#[async_trait]
pub trait HostFlow: Send + Sync {
    /// Read the next available batch of packets from the host interface.
    async fn read_packets(&self) -> Result<Vec<HostPacket>, SessionError>;

    /// Write a batch of decoded packets to the host interface.
    async fn write_packets(&self, packets: Vec<HostPacket>) -> Result<(), SessionError>;
}

/// Network settings to apply to the host's virtual interface once DHCP has
/// bound a lease.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub remote_address: Ipv4Addr,
    pub ipv4_addresses: Vec<Ipv4Addr>,
    pub ipv4_masks: Vec<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    /// Routes to install; always `[default]` per spec §6.
    pub included_routes: Vec<&'static str>,
    pub dns_servers: Vec<std::net::IpAddr>,
    /// Domains DNS queries should match against; always `[""]` per spec §6.
    pub dns_match_domains: Vec<String>,
    pub mtu: u16,
}

/// The host-side settings collaborator (spec §6 "Settings applier").
#[async_trait]
pub trait SettingsApplier: Send + Sync {
    async fn apply(&self, settings: NetworkSettings) -> Result<(), SessionError>;
}

/// Credential shape returned by an `AuthSource` (spec §6 "Auth source").
#[derive(Debug, Clone)]
pub enum Credential {
    Password { username: String, password: Vec<u8> },
    BearerToken(String),
}

#[async_trait]
pub trait AuthSource: Send + Sync {
    async fn credential(&self) -> Result<Credential, SessionError>;
}

/// Extract a username from a JWT-like bearer token's claims, preferring
/// `email` then `preferred_username`. Fails with `BuildAuthFromToken` if
/// neither claim is present or the token isn't decodable as JSON claims.
///
/// This only base64url-decodes and JSON-parses the middle segment; it does
/// NOT verify the token's signature, which is the identity provider's job,
/// not this client's.
pub fn username_from_bearer_token(token: &str) -> Result<String, SessionError> {
    let claims_segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| SessionError::Auth(crate::error::AuthError::BuildAuthFromToken))?;

    let padded = pad_base64url(claims_segment);
    let decoded = decode_base64url(&padded)
        .ok_or_else(|| SessionError::Auth(crate::error::AuthError::BuildAuthFromToken))?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded)
        .map_err(|_| SessionError::Auth(crate::error::AuthError::BuildAuthFromToken))?;

    claims
        .get("email")
        .or_else(|| claims.get("preferred_username"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| SessionError::Auth(crate::error::AuthError::BuildAuthFromToken))
}

fn pad_base64url(segment: &str) -> String {
    let mut s = segment.to_string();
    while s.len() % 4 != 0 {
        s.push('=');
    }
    s
}

fn decode_base64url(padded: &str) -> Option<Vec<u8>> {
    // Minimal base64url decoder: no external crate is pulled in solely for
    // this one-shot claims peek.
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut table = [255u8; 256];
    for (i, &c) in ALPHABET.iter().enumerate() {
        table[c as usize] = i as u8;
    }

    let bytes: Vec<u8> = padded.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(bytes.len() * 3 / 4);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for b in bytes {
        let value = table[b as usize];
        if value == 255 {
            return None;
        }
        buffer = (buffer << 6) | value as u32;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Some(out)
}

/// App-level command handler the session exposes to its embedder (spec §6
/// "App-message handler").
#[async_trait]
pub trait AppMessageHandler: Send + Sync {
    async fn handle_message(&self, command: &str) -> Vec<u8>;
}
