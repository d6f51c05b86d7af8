//! Simulated power supply for running the gateway without hardware
//!
//! Listens on `host:port_device` from the same configuration file the
//! gateway reads.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use psu_gw::config::{level_directive, GatewayConfig};
use psu_gw::logging::init_logging;
use psu_gw::simulator::{Simulator, DEFAULT_REPLY_DELAY};

/// Simulated four-channel power supply
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(default_value = "config.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "debug")]
    log_level: String,

    /// Milliseconds before answering a measurement
    #[arg(long, default_value_t = DEFAULT_REPLY_DELAY.as_millis() as u64)]
    reply_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = if args.config.exists() {
        GatewayConfig::load(&args.config).await?
    } else {
        GatewayConfig::default()
    };
    let _log_guard = init_logging(&level_directive(&args.log_level), None)?;

    let handle = Simulator::new()
        .with_reply_delay(Duration::from_millis(args.reply_delay_ms))
        .bind((config.host.as_str(), config.port_device))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port_device))?;
    info!("Simulator ready on {}", handle.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for CTRL+C")?;
    handle.shutdown();
    info!("Simulator stopped");
    Ok(())
}
