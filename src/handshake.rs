//! Hello/Auth/Welcome handshake (spec §4.4) over the TLS control channel.
//!
//! The request/response framing here is hand-rolled HTTP/1.1 rather than a
//! general-purpose HTTP client: both requests have a fixed, known-length
//! body and both responses are read by `Content-Length`, so pulling in a
//! full client (with its chunked-encoding and redirect machinery) would add
//! surface area this protocol never exercises.

use rand::RngCore;

use crate::config::SessionConfig;
use crate::error::HandshakeError;
use crate::pack::Pack;
use crate::tls::ControlChannel;

/// Opaque watermark blob prefixed to every Hello request body. Real clients
/// use this to identify themselves to the server's DPI heuristics; its
/// exact bytes are not meaningful to this engine, only its presence.
const WATERMARK: &[u8] = b"SEVPNCLIENT_WATERMARK_V1";

/// Result of a successful Hello exchange.
#[derive(Debug, Clone)]
pub struct HelloInfo {
    pub random20: [u8; 20],
    pub version: u32,
    pub build: u32,
    pub banner: String,
}

/// Credential shape presented during Auth.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    Password { username: String, password: Vec<u8> },
    Jwt { username: String, token: String },
}

/// This client's advertised UDP acceleration parameters (spec §4.8), sent
/// as part of the Auth pack when UDP acceleration is enabled.
#[derive(Debug, Clone)]
pub struct UdpAccelAdvertisement {
    pub client_key_v2: [u8; 128],
    pub client_key_v1: [u8; 20],
    pub local_ipv4: std::net::Ipv4Addr,
    pub local_port: u16,
}

/// Server's UDP acceleration parameters parsed out of Welcome.
#[derive(Debug, Clone)]
pub struct UdpAccelWelcome {
    pub server_key_v2: Vec<u8>,
    pub server_cookie: u32,
    pub client_cookie: u32,
    pub reported_ipv4: Option<std::net::Ipv4Addr>,
    pub reported_port: Option<u16>,
    pub fast_disconnect_detect: bool,
}

/// Parsed session descriptor from a successful Welcome.
#[derive(Debug, Clone)]
pub struct WelcomeInfo {
    pub session_name: String,
    pub connection_name: String,
    pub session_key: [u8; 20],
    pub session_key_32: u64,
    pub max_connection: u32,
    pub use_compress: bool,
    pub use_encrypt: bool,
    pub half_connection: bool,
    pub timeout: u32,
    pub enable_udp_recovery: bool,
    pub udp_accel: Option<UdpAccelWelcome>,
}

/// Run the Hello step: POST the watermark (plus padding) to
/// `/vpnsvc/connect.cgi` and parse the server's Pack response.
pub async fn hello(channel: &mut ControlChannel, host: &str) -> Result<HelloInfo, HandshakeError> {
    let mut rng = rand::thread_rng();
    let pad_len = (rng.next_u32() % 2000) as usize; // 0..=1999
    let mut body = WATERMARK.to_vec();
    let mut padding = vec![0u8; pad_len];
    rng.fill_bytes(&mut padding);
    body.extend_from_slice(&padding);

    let request = build_http_request(
        "POST",
        "/vpnsvc/connect.cgi",
        host,
        "image/jpeg",
        &body,
    );
    channel
        .write_all(&request)
        .await
        .map_err(|e| HandshakeError::Io(e.to_string()))?;

    let response_body = read_http_response(channel)
        .await
        .map_err(|e| HandshakeError::Hello(e.to_string()))?;

    let pack = Pack::decode(&response_body)?;
    if let Some(err) = pack.get_str("error") {
        return Err(HandshakeError::ServerError(err.to_string()));
    }

    let random20 = pack
        .get_data("random")
        .ok_or(HandshakeError::MissingField("random"))?;
    if random20.len() < 20 {
        return Err(HandshakeError::Hello(format!(
            "random field too short: {} bytes",
            random20.len()
        )));
    }
    let mut random = [0u8; 20];
    random.copy_from_slice(&random20[..20]);

    Ok(HelloInfo {
        random20: random,
        version: pack.get_int("version").unwrap_or(0),
        build: pack.get_int("build").unwrap_or(0),
        banner: pack.get_str("hello").unwrap_or_default().to_string(),
    })
}

/// Run the Auth step: POST the login Pack to `/vpnsvc/vpn.cgi` and parse the
/// Welcome response.
pub async fn auth(
    channel: &mut ControlChannel,
    host: &str,
    config: &SessionConfig,
    method: &AuthMethod,
    hello_random: &[u8; 20],
    udp_advert: Option<&UdpAccelAdvertisement>,
) -> Result<WelcomeInfo, HandshakeError> {
    let mut pack = Pack::new();
    pack.add_str("method", "login");
    pack.add_str("hubname", &config.se_hub);

    let username = match method {
        AuthMethod::Password { username, .. } => username.clone(),
        AuthMethod::Jwt { username, .. } => username.clone(),
    };
    pack.add_str("username", &username);

    match method {
        AuthMethod::Password { username, password } => {
            let digest = crate::sha0::secure_password(password, username, hello_random);
            pack.add_int("authtype", 1);
            pack.add_data("secure_password", digest.to_vec());
        }
        AuthMethod::Jwt { token, .. } => {
            pack.add_int("authtype", 6);
            pack.add_str("jwt", token);
        }
    }

    pack.add_int("protocol", 0);
    pack.add_bool("use_encrypt", true);
    pack.add_bool("use_compress", false);
    pack.add_int("max_connection", 1);
    pack.add_bool("half_connection", false);
    pack.add_bool("qos", false);

    let (client_str, client_ver, client_build) = split_banner(&config.client_banner);
    pack.add_str("client_str", client_str);
    pack.add_int("client_ver", client_ver);
    pack.add_int("client_build", client_build);

    let mut rng = rand::thread_rng();
    let mut pencore = vec![0u8; (rng.next_u32() % 1000) as usize];
    rng.fill_bytes(&mut pencore);
    pack.add_data("pencore", pencore);

    if let Some(advert) = udp_advert {
        pack.add_data("udp_client_key_v2", advert.client_key_v2.to_vec());
        pack.add_data("udp_client_key_v1", advert.client_key_v1.to_vec());
        pack.add_ipv4("udp_client_ip", advert.local_ipv4);
        pack.add_int("udp_client_port", advert.local_port as u32);
        pack.add_bool("udp_accel_supported", true);
    } else {
        pack.add_bool("udp_accel_supported", false);
    }

    let body = pack.encode();
    let request = build_http_request(
        "POST",
        "/vpnsvc/vpn.cgi",
        host,
        "application/octet-stream",
        &body,
    );
    channel
        .write_all(&request)
        .await
        .map_err(|e| HandshakeError::Io(e.to_string()))?;

    let response_body = read_http_response(channel)
        .await
        .map_err(|e| HandshakeError::AuthPost(e.to_string()))?;

    parse_welcome(&response_body)
}

fn parse_welcome(body: &[u8]) -> Result<WelcomeInfo, HandshakeError> {
    let pack = Pack::decode(body)?;

    if let Some(err) = pack.get_str("error") {
        return Err(HandshakeError::ServerError(err.to_string()));
    }

    if pack.get_bool("Redirect").unwrap_or(false) {
        return Err(HandshakeError::RedirectUnimplemented);
    }

    let session_name = pack
        .get_str("session_name")
        .ok_or(HandshakeError::MissingField("session_name"))?
        .to_string();
    let connection_name = pack
        .get_str("connection_name")
        .ok_or(HandshakeError::MissingField("connection_name"))?
        .to_string();
    let session_key_bytes = pack
        .get_data("session_key")
        .ok_or(HandshakeError::MissingField("session_key"))?;
    if session_key_bytes.len() < 20 {
        return Err(HandshakeError::MissingField("session_key"));
    }
    let mut session_key = [0u8; 20];
    session_key.copy_from_slice(&session_key_bytes[..20]);
    let session_key_32 = pack
        .get_int64("session_key_32")
        .ok_or(HandshakeError::MissingField("session_key_32"))?;

    let udp_accel = parse_udp_accel_welcome(&pack)?;

    Ok(WelcomeInfo {
        session_name,
        connection_name,
        session_key,
        session_key_32,
        max_connection: pack.get_int("max_connection").unwrap_or(1),
        use_compress: pack.get_bool("use_compress").unwrap_or(false),
        use_encrypt: pack.get_bool("use_encrypt").unwrap_or(true),
        half_connection: pack.get_bool("half_connection").unwrap_or(false),
        timeout: pack.get_int("timeout").unwrap_or(0),
        enable_udp_recovery: pack.get_bool("enable_udp_recovery").unwrap_or(false),
        udp_accel,
    })
}

fn parse_udp_accel_welcome(pack: &Pack) -> Result<Option<UdpAccelWelcome>, HandshakeError> {
    if !pack.contains("udp_server_key_v2") {
        return Ok(None);
    }
    if pack.get_bool("udp_accel_v1_only").unwrap_or(false) {
        return Err(HandshakeError::UdpAccelV1Unsupported);
    }

    let key = pack
        .get_data("udp_server_key_v2")
        .ok_or(HandshakeError::MissingField("udp_server_key_v2"))?;
    if key.len() < 32 {
        return Err(HandshakeError::UdpAccelKeyTooShort(key.len()));
    }

    Ok(Some(UdpAccelWelcome {
        server_key_v2: key.to_vec(),
        server_cookie: pack
            .get_int("udp_server_cookie")
            .ok_or(HandshakeError::MissingField("udp_server_cookie"))?,
        client_cookie: pack
            .get_int("udp_client_cookie")
            .ok_or(HandshakeError::MissingField("udp_client_cookie"))?,
        reported_ipv4: pack.get_ipv4("udp_reported_ip"),
        reported_port: pack.get_int("udp_reported_port").map(|p| p as u16),
        fast_disconnect_detect: pack.get_bool("udp_fast_disconnect_detect").unwrap_or(false),
    }))
}

fn split_banner(banner: &str) -> (&str, u32, u32) {
    // "se-tunnel/0.1.0" -> ("se-tunnel", 1, 0)
    match banner.split_once('/') {
        Some((name, version)) => {
            let mut parts = version.split('.');
            let major: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(1);
            let minor: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            (name, major, minor)
        }
        None => (banner, 1, 0),
    }
}

fn build_http_request(method: &str, path: &str, host: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let header = format!(
        "{method} {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: Keep-Alive\r\n\r\n",
        body.len()
    );
    let mut request = header.into_bytes();
    request.extend_from_slice(body);
    request
}

/// Read a full HTTP/1.1 response (status line + headers + `Content-Length`
/// body) off the control channel and return the body bytes.
async fn read_http_response(channel: &mut ControlChannel) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = channel.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before headers completed",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]);
    let status_line = header_text.lines().next().unwrap_or_default();
    if !status_line.contains(" 200 ") {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected http status: {status_line}"),
        ));
    }

    let content_length = header_text
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "missing content-length")
        })?;

    let mut body = buf.split_off(header_end);
    while body.len() < content_length {
        let n = channel.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before body completed",
            ));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    Ok(body)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_banner_parses_name_and_version() {
        assert_eq!(split_banner("se-tunnel/1.2.3"), ("se-tunnel", 1, 2));
        assert_eq!(split_banner("noversion"), ("noversion", 1, 0));
    }

    #[test]
    fn http_request_has_correct_content_length() {
        let body = b"hello world".to_vec();
        let req = build_http_request("POST", "/vpnsvc/connect.cgi", "example.com", "image/jpeg", &body);
        let text = String::from_utf8_lossy(&req);
        assert!(text.contains("Content-Length: 11"));
        assert!(text.ends_with("hello world"));
    }

    #[test]
    fn parse_welcome_rejects_redirect() {
        let mut pack = Pack::new();
        pack.add_bool("Redirect", true);
        pack.add_str("Ip", "10.0.0.1");
        let err = parse_welcome(&pack.encode()).unwrap_err();
        assert!(matches!(err, HandshakeError::RedirectUnimplemented));
    }

    #[test]
    fn parse_welcome_requires_session_key() {
        let mut pack = Pack::new();
        pack.add_str("session_name", "SID-1");
        pack.add_str("connection_name", "CID-1");
        pack.add_int64("session_key_32", 42);
        let err = parse_welcome(&pack.encode()).unwrap_err();
        assert!(matches!(err, HandshakeError::MissingField("session_key")));
    }

    #[test]
    fn parse_welcome_succeeds_with_required_fields() {
        let mut pack = Pack::new();
        pack.add_str("session_name", "SID-1");
        pack.add_str("connection_name", "CID-1");
        pack.add_data("session_key", vec![7u8; 20]);
        pack.add_int64("session_key_32", 42);

        let welcome = parse_welcome(&pack.encode()).unwrap();
        assert_eq!(welcome.session_name, "SID-1");
        assert_eq!(welcome.session_key, [7u8; 20]);
        assert_eq!(welcome.max_connection, 1);
        assert!(welcome.udp_accel.is_none());
    }

    #[test]
    fn parse_welcome_rejects_short_udp_key() {
        let mut pack = Pack::new();
        pack.add_str("session_name", "SID-1");
        pack.add_str("connection_name", "CID-1");
        pack.add_data("session_key", vec![7u8; 20]);
        pack.add_int64("session_key_32", 42);
        pack.add_data("udp_server_key_v2", vec![1u8; 10]);
        pack.add_int("udp_server_cookie", 111);
        pack.add_int("udp_client_cookie", 222);

        let err = parse_welcome(&pack.encode()).unwrap_err();
        assert!(matches!(err, HandshakeError::UdpAccelKeyTooShort(10)));
    }
}
