//! se-tunnel-cli - demo/diagnostic front end for the SoftEther session engine.
//!
//! This binary exercises the library end to end (connect -> handshake ->
//! DHCP -> tunnel) against a real server. It is not a production VPN client:
//! the host-side packet flow and network-settings collaborators are simple
//! stand-ins that log what they would have done rather than touching a real
//! TUN device, since TUN device management is out of scope for this crate
//! (see the crate's module docs).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use se_tunnel::collaborators::{
    AuthSource, Credential, HostFlow, HostPacket, NetworkSettings, SettingsApplier,
};
use se_tunnel::error::SessionError;
use se_tunnel::{Session, SessionConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_DATE: &str = env!("BUILD_DATE");
const GIT_HASH: &str = env!("GIT_HASH");

#[derive(Parser)]
#[command(name = "se-tunnel-cli")]
#[command(version = VERSION)]
#[command(about = "SoftEther-compatible VPN session engine demo client", long_about = None)]
struct Cli {
    /// Configuration file path (TOML, see `genconf`)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, handshake, obtain an IP via DHCP, and start tunneling
    Run {
        /// SoftEther server host (literal IPv4 address)
        #[arg(long)]
        host: Option<String>,

        /// SoftEther server port
        #[arg(long)]
        port: Option<u16>,

        /// Virtual hub name
        #[arg(long)]
        hub: Option<String>,

        /// Username for password auth (overrides SE_TUNNEL_USERNAME)
        #[arg(long, env = "SE_TUNNEL_USERNAME")]
        username: Option<String>,

        /// Password for password auth (overrides SE_TUNNEL_PASSWORD)
        #[arg(long, env = "SE_TUNNEL_PASSWORD")]
        password: Option<String>,

        /// Bearer token for authtype=6 auth (overrides SE_TUNNEL_TOKEN); takes
        /// priority over username/password if set
        #[arg(long, env = "SE_TUNNEL_TOKEN")]
        token: Option<String>,

        /// Disable UDP acceleration even if the server offers it
        #[arg(long)]
        no_udp_accel: bool,
    },

    /// Generate a default configuration file
    Genconf {
        /// Output path for the generated config
        #[arg(long, default_value = "se-tunnel.toml")]
        output: PathBuf,

        #[arg(long)]
        host: String,

        #[arg(long, default_value_t = 443)]
        port: u16,

        #[arg(long)]
        hub: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    info!("se-tunnel-cli {VERSION} ({GIT_HASH}, built {BUILD_DATE})");

    match cli.command {
        Commands::Run {
            host,
            port,
            hub,
            username,
            password,
            token,
            no_udp_accel,
        } => {
            run(
                cli.config,
                host,
                port,
                hub,
                username,
                password,
                token,
                no_udp_accel,
            )
            .await
        }
        Commands::Genconf {
            output,
            host,
            port,
            hub,
        } => genconf(&output, host, port, hub),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    hub: Option<String>,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    no_udp_accel: bool,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => SessionConfig::from_file(&path).context("loading config file")?,
        None => SessionConfig::default(),
    };
    if let Some(host) = host {
        config.se_host = host;
    }
    if let Some(port) = port {
        config.se_port = port;
    }
    if let Some(hub) = hub {
        config.se_hub = hub;
    }
    if no_udp_accel {
        config.udp_accel_enabled = false;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let auth_source: Arc<dyn AuthSource> = if let Some(token) = token {
        Arc::new(StaticBearerToken(token))
    } else {
        let username = username.context("username required unless --token is supplied")?;
        let password = password.context("password required unless --token is supplied")?;
        Arc::new(StaticPassword { username, password: password.into_bytes() })
    };

    let session = Session::new(config);

    info!("connecting...");
    session.connect().await.context("connect failed")?;

    info!("handshaking...");
    session.handshake(auth_source).await.context("handshake failed")?;

    info!("requesting an address via dhcp...");
    let network = session.obtain_ip_via_dhcp().await.context("dhcp failed")?;
    info!(
        "bound {} / {} (gateway {:?}, dns {:?}, lease {:?})",
        network.ip, network.subnet_mask, network.router, network.dns, network.lease_time
    );

    let flow: Arc<dyn HostFlow> = Arc::new(LoggingHostFlow);
    let settings: Arc<dyn SettingsApplier> = Arc::new(LoggingSettingsApplier);
    session
        .start_tunneling(flow, settings)
        .await
        .context("failed to start tunneling")?;

    info!("tunneling. press ctrl-c to stop.");
    tokio::signal::ctrl_c().await.ok();

    info!("shutting down...");
    session.stop().await;
    let stats = session.stats().await;
    info!(
        "final stats: {} packets / {} bytes sent, {} packets / {} bytes received",
        stats.packets_sent, stats.bytes_sent, stats.packets_received, stats.bytes_received
    );
    Ok(())
}

fn genconf(output: &PathBuf, host: String, port: u16, hub: String) -> Result<()> {
    let config = SessionConfig {
        se_host: host,
        se_port: port,
        se_hub: hub,
        ..Default::default()
    };
    config.to_file(output).context("writing config file")?;
    println!("wrote {}", output.display());
    Ok(())
}

struct StaticPassword {
    username: String,
    password: Vec<u8>,
}

#[async_trait::async_trait]
impl AuthSource for StaticPassword {
    async fn credential(&self) -> Result<Credential, SessionError> {
        Ok(Credential::Password {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

struct StaticBearerToken(String);

#[async_trait::async_trait]
impl AuthSource for StaticBearerToken {
    async fn credential(&self) -> Result<Credential, SessionError> {
        Ok(Credential::BearerToken(self.0.clone()))
    }
}

/// A host flow stand-in that never produces packets and logs whatever it's
/// asked to write. A real embedder wires this to a TUN device.
struct LoggingHostFlow;

#[async_trait::async_trait]
impl HostFlow for LoggingHostFlow {
    async fn read_packets(&self) -> Result<Vec<HostPacket>, SessionError> {
        std::future::pending().await
    }

    async fn write_packets(&self, packets: Vec<HostPacket>) -> Result<(), SessionError> {
        for packet in packets {
            info!("inbound {:?} packet, {} bytes", packet.protocol, packet.bytes.len());
        }
        Ok(())
    }
}

struct LoggingSettingsApplier;

#[async_trait::async_trait]
impl SettingsApplier for LoggingSettingsApplier {
    async fn apply(&self, settings: NetworkSettings) -> Result<(), SessionError> {
        info!(
            "would apply network settings: addr={:?} mask={:?} router={:?} dns={:?} mtu={}",
            settings.ipv4_addresses, settings.ipv4_masks, settings.router, settings.dns_servers, settings.mtu
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_password_returns_supplied_credential() {
        let source = StaticPassword {
            username: "alice".to_string(),
            password: b"p@ss".to_vec(),
        };
        match source.credential().await.unwrap() {
            Credential::Password { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password, b"p@ss");
            }
            _ => panic!("expected password credential"),
        }
    }

    #[tokio::test]
    async fn static_bearer_token_returns_supplied_token() {
        let source = StaticBearerToken("tok123".to_string());
        match source.credential().await.unwrap() {
            Credential::BearerToken(token) => assert_eq!(token, "tok123"),
            _ => panic!("expected bearer token credential"),
        }
    }
}
