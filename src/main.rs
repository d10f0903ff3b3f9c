use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lora_gateway_bridge::config::Config;
use lora_gateway_bridge::core::unmarshal;
use lora_gateway_bridge::udp::{SemtechHandler, UdpAdapter, UpstreamReply, UpstreamRequest};

#[derive(Parser)]
#[command(name = "lora-gateway-bridge")]
#[command(about = "Semtech UDP gateway bridge for LoRaWAN networks")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the UDP bind address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });
    if let Some(bind) = cli.bind {
        config.udp.bind = bind;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("lora-gateway-bridge v{}", env!("CARGO_PKG_VERSION"));

    let handler = SemtechHandler::new(config.handler());
    let (adapter, upstream) = UdpAdapter::bind(config.adapter(), handler).await?;
    tokio::spawn(log_uplinks(upstream));

    info!("Bridge running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    adapter.shutdown().await?;

    Ok(())
}

/// Upstream stand-in: log every uplink and never answer with a downlink.
async fn log_uplinks(mut rx: mpsc::Receiver<UpstreamRequest>) {
    while let Some(request) = rx.recv().await {
        match unmarshal(&request.packet) {
            Ok(packet) => info!(
                dev_eui = %packet.as_packet().dev_eui(),
                "Uplink: {}",
                packet
            ),
            Err(e) => warn!("Undecodable upstream packet: {}", e),
        }
        // The handler may have given up waiting already
        let _ = request.reply.send(UpstreamReply::NoDownlink);
    }
}
