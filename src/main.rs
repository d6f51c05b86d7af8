//! PSU GW - HTTP gateway for a four-channel bench power supply

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use psu_gw::config::{level_directive, GatewayConfig};
use psu_gw::logging::init_logging;
use psu_gw::{api, Gateway};

/// PSU Gateway - control a bench power supply over HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(default_value = "config.yaml")]
    config: PathBuf,

    /// Log level, overrides `log_level` from the configuration
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = GatewayConfig::load(&args.config).await?;
    let directive = match &args.log_level {
        Some(level) => level_directive(level),
        None => config.log_directive(),
    };
    let _log_guard = init_logging(&directive, config.log_file.as_deref())?;

    info!("Starting PSU GW...");
    info!("Configuration file: {}", args.config.display());

    let gateway = Gateway::new(config.clone());
    gateway
        .session()
        .subscribe_phase(Arc::new(|phase| debug!("Device phase: {:?}", phase)));
    info!("Connecting to device at {}", gateway.session().endpoint());

    // Block until the device answers, like the polling loop would
    tokio::select! {
        _ = gateway.session().connect() => {}
        _ = shutdown_signal() => {
            info!("PSU GW shutdown complete");
            return Ok(());
        }
    }

    let poller = gateway.poller().spawn();

    tokio::select! {
        result = api::start_server(gateway, config.port_driver) => {
            if let Err(e) = result {
                poller.abort();
                return Err(e);
            }
        }
        _ = shutdown_signal() => {}
    }

    poller.abort();
    info!("PSU GW shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
