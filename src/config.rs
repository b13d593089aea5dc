//! Session configuration.
//!
//! Per spec §9's "Global state" note: the engine reads nothing from
//! process-wide sources. Everything it needs is injected explicitly through
//! `SessionConfig`.

use serde::{Deserialize, Serialize};

fn default_client_banner() -> String {
    format!("se-tunnel/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

/// Configuration consumed at session start (spec §6 "Provider configuration").
///
/// Only these fields are significant; an `oidc` group used to locate a
/// cached credential is a concern of the `AuthSource` collaborator, not of
/// this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// SoftEther server host (literal IPv4 or DNS name resolved by the caller
    /// before construction — the engine itself performs no DNS).
    pub se_host: String,

    /// SoftEther server TCP/TLS port.
    pub se_port: u16,

    /// Virtual hub name.
    pub se_hub: String,

    /// Whether to advertise and attempt UDP acceleration v2.
    #[serde(default = "default_true")]
    pub udp_accel_enabled: bool,

    /// `client_str`/`client_ver`/`client_build` banner sent during Auth.
    #[serde(default = "default_client_banner")]
    pub client_banner: String,

    /// TLS certificate verification policy (Open Question in spec §9).
    #[serde(default)]
    pub tls_verify: TlsVerifyPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            se_host: String::new(),
            se_port: 443,
            se_hub: String::new(),
            udp_accel_enabled: true,
            client_banner: default_client_banner(),
            tls_verify: TlsVerifyPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration before use.
    pub fn validate(&self) -> Result<(), String> {
        if self.se_host.is_empty() {
            return Err("se_host must not be empty".to_string());
        }
        if self.se_hub.is_empty() {
            return Err("se_hub must not be empty".to_string());
        }
        if self.se_port == 0 {
            return Err("se_port must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Certificate verification policy for the TLS control channel.
///
/// The source's confidentiality is bootstrapped by the SoftEther session key
/// exchanged inside the Pack handshake, not by the TLS layer, so `Insecure`
/// is the spec-mandated default. Pinning the server's leaf certificate is
/// left as an explicit opt-in (spec §9 Open Question).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TlsVerifyPolicy {
    /// Accept any certificate the server presents.
    #[default]
    Insecure,
    /// Pin to a specific leaf certificate, DER-encoded.
    PinnedLeaf(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation() {
        let config = SessionConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn filled_config_validates() {
        let config = SessionConfig {
            se_host: "198.51.100.7".to_string(),
            se_port: 443,
            se_hub: "H".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_tls_policy_is_insecure() {
        assert_eq!(SessionConfig::default().tls_verify, TlsVerifyPolicy::Insecure);
    }
}
