//! se-tunnel: a SoftEther-compatible Layer-2 VPN session engine.
//!
//! This crate embeds a SoftEther client session end to end: the TLS control
//! channel and Pack wire codec, the Hello/Auth/Welcome handshake, the framed
//! TCP data stream with its UDP acceleration v2 fallback, an embedded DHCP
//! client, an ARP resolver, and the bidirectional packet pump that ties a
//! host-side TUN-like interface to the SoftEther hub. It does not include a
//! TUN device driver, a GUI, or a SoftEther server — those are the embedder's
//! job, reached through the collaborator traits in [`collaborators`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use se_tunnel::{Session, SessionConfig};
//! use se_tunnel::collaborators::{AuthSource, Credential, HostFlow, HostPacket, SettingsApplier, NetworkSettings};
//! use se_tunnel::error::SessionError;
//!
//! struct StaticPassword;
//! #[async_trait::async_trait]
//! impl AuthSource for StaticPassword {
//!     async fn credential(&self) -> Result<Credential, SessionError> {
//!         Ok(Credential::Password { username: "alice".into(), password: b"hunter2".to_vec() })
//!     }
//! }
//!
//! # async fn example(flow: Arc<dyn HostFlow>, settings: Arc<dyn SettingsApplier>) -> Result<(), SessionError> {
//! let session = Session::new(SessionConfig::default());
//! session.connect().await?;
//! session.handshake(Arc::new(StaticPassword)).await?;
//! session.obtain_ip_via_dhcp().await?;
//! session.start_tunneling(flow, settings).await?;
//! session.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//!
//! - [`session`] — the orchestrator: state machine, two-lane concurrency,
//!   packet pumps, keep-alives.
//! - [`tls`] — the TLS control channel.
//! - [`pack`] — the tag/type/value wire codec used by the handshake.
//! - [`handshake`] — Hello/Auth/Welcome over the control channel.
//! - [`framer`] — the length-prefixed TCP stream framing.
//! - [`udp_accel`] — UDP acceleration v2: crypto, readiness, endpoints.
//! - [`dhcp`] — the embedded DHCP client state machine.
//! - [`arp_resolver`] — ARP cache, resolution, and gratuitous announce.
//! - [`pumps`] — routing decisions shared by both packet-pump directions.
//! - [`mac`] — locally-administered MAC address generation.
//! - [`sha0`] — the legacy digest SoftEther uses to derive `secure_password`.
//! - [`l2`] — Ethernet/ARP/IPv4/UDP/DHCP packet encode/decode.
//! - [`collaborators`] — the capability-interface traits the embedder
//!   implements (`HostFlow`, `SettingsApplier`, `AuthSource`,
//!   `AppMessageHandler`).
//! - [`config`] — `SessionConfig`, loaded from or saved to TOML.
//! - [`error`] — the `SessionError` taxonomy and its subsystem variants.

pub mod arp_resolver;
pub mod collaborators;
pub mod config;
pub mod dhcp;
pub mod error;
pub mod framer;
pub mod handshake;
pub mod l2;
pub mod mac;
pub mod pack;
pub mod pumps;
pub mod session;
pub mod sha0;
pub mod tls;
pub mod udp_accel;

pub use collaborators::{AppMessageHandler, AuthSource, Credential, HostFlow, HostPacket, NetworkSettings, SettingsApplier};
pub use config::{SessionConfig, TlsVerifyPolicy};
pub use error::{AuthError, DhcpError, HandshakeError, SessionError};
pub use session::{Session, SessionState, SessionStats};
