//! TLS control channel: a `tokio-rustls` client connection carrying the
//! Hello/Auth/Welcome handshake and the subsequent framed TCP stream.
//!
//! Certificate verification is policy-driven via [`crate::config::TlsVerifyPolicy`].
//! The `danger` submodule's accept-all verifier mirrors the skip-verification
//! pattern used for transport bring-up elsewhere in this codebase, but here it
//! is gated behind an explicit config choice rather than being the only option.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::TlsVerifyPolicy;
use crate::error::SessionError;

/// The TLS connection over which the Pack handshake and the framed data
/// stream both travel.
pub struct ControlChannel {
    stream: TlsStream<TcpStream>,
}

impl ControlChannel {
    /// Open a TCP connection to `addr` and perform the TLS handshake,
    /// verifying the server's identity per `policy`.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        policy: &TlsVerifyPolicy,
    ) -> Result<Self, SessionError> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;

        let client_config = build_client_config(policy);
        let connector = TlsConnector::from(Arc::new(client_config));

        let dns_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| SessionError::SessionConnectFailed(format!("bad server name: {e}")))?;

        let stream = connector
            .connect(dns_name, tcp)
            .await
            .map_err(|e| SessionError::SessionConnectFailed(format!("tls handshake: {e}")))?;

        Ok(Self { stream })
    }

    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data).await
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.stream.read_exact(buf).await?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes, returning the number read (0 on EOF).
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf).await
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }

    pub fn into_inner(self) -> TlsStream<TcpStream> {
        self.stream
    }
}

fn build_client_config(policy: &TlsVerifyPolicy) -> rustls::ClientConfig {
    match policy {
        TlsVerifyPolicy::Insecure => rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::AcceptAllVerifier::new()))
            .with_no_client_auth(),
        TlsVerifyPolicy::PinnedLeaf(pinned_der) => {
            let mut roots = rustls::RootCertStore::empty();
            // A pinned leaf is added directly as a trust anchor; this only
            // works for the exact leaf, which is the point of pinning.
            let cert = rustls::pki_types::CertificateDer::from(pinned_der.clone());
            let _ = roots.add(cert);
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
    }
}

/// The deliberately-insecure verifier used under [`TlsVerifyPolicy::Insecure`].
///
/// SoftEther's own confidentiality guarantee for the tunnel comes from the
/// session key negotiated inside the Pack handshake, not from the outer TLS
/// layer, so treating the control channel's TLS as transport obfuscation
/// rather than an authentication boundary matches how real clients behave
/// against self-signed VPN gateways.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    pub struct AcceptAllVerifier;

    impl AcceptAllVerifier {
        pub fn new() -> Self {
            Self
        }
    }

    impl ServerCertVerifier for AcceptAllVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer,
            _intermediates: &[CertificateDer],
            _server_name: &ServerName,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_policy_builds_a_client_config() {
        // Construction must not panic; connecting requires a live server and
        // is exercised by the handshake integration tests instead.
        let _ = build_client_config(&TlsVerifyPolicy::Insecure);
    }

    #[test]
    fn pinned_leaf_with_garbage_der_still_builds_a_config() {
        let _ = build_client_config(&TlsVerifyPolicy::PinnedLeaf(vec![0u8; 4]));
    }
}
