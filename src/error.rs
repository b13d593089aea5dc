//! Error taxonomy for the session engine.
//!
//! Each kind named in the spec becomes a real `thiserror` variant, nested by
//! subsystem the way the teacher crate nests `TunnelError`/`NooshdarooError`.

use thiserror::Error;

/// Top-level session error surfaced to callers of `Session` methods.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("provider config missing or invalid: {0}")]
    ProviderConfig(String),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("session connect failed: {0}")]
    SessionConnectFailed(String),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("dhcp failed: {0}")]
    Dhcp(#[from] DhcpError),

    #[error("failed to apply network settings: {0}")]
    NeSettingsApplyFailed(String),

    #[error("transport closed by remote")]
    TransportClosed,

    #[error("operation not valid in current state: {0}")]
    BadState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors resolving credentials before any network I/O happens.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("bad auth options: {0}")]
    BadOptions(String),

    #[error("no credential available")]
    MissingCredential,

    #[error("token acquisition failed: {0}")]
    TokenAcquisitionFailed(String),

    #[error("token response missing id_token")]
    MissingIdToken,

    #[error("could not build username from bearer token")]
    BuildAuthFromToken,
}

/// Hello/Auth/Welcome handshake failures.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("hello failed: {0}")]
    Hello(String),

    #[error("auth post failed: {0}")]
    AuthPost(String),

    #[error("server reported error: {0}")]
    ServerError(String),

    #[error("missing mandatory welcome field: {0}")]
    MissingField(&'static str),

    #[error("server redirect is not implemented")]
    RedirectUnimplemented,

    #[error("udp acceleration v1 is not supported")]
    UdpAccelV1Unsupported,

    #[error("udp acceleration key too short: got {0} bytes, need at least 32")]
    UdpAccelKeyTooShort(usize),

    #[error("pack decode error: {0}")]
    Pack(#[from] crate::pack::PackError),

    #[error("http transport error: {0}")]
    Io(String),
}

/// DHCP client failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DhcpError {
    #[error("dhcp timed out waiting for a response")]
    Timeout,

    #[error("dhcp server sent NAK")]
    Nak,

    #[error("invalid dhcp message")]
    InvalidMessage,

    #[error("dhcp ack missing required fields")]
    IncompleteConfig,

    #[error("internal dhcp error: {0}")]
    Internal(String),
}
