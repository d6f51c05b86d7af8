//! Configuration management for PSU GW
//!
//! Handles loading and validating the YAML configuration file. Every key is
//! optional; missing keys fall back to the defaults below.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Device host name or address
    pub host: String,
    /// Device TCP port (line protocol)
    pub port_device: u16,
    /// HTTP control surface port
    pub port_driver: u16,
    /// Seconds between poll cycles, also the reconnect delay
    pub poll_interval: f64,
    /// Log file path; `null` logs to stderr
    pub log_file: Option<PathBuf>,
    /// Log level (`DEBUG`, `INFO`, `WARNING`, ... or any tracing filter)
    pub log_level: String,
    /// Seconds to wait for one command round trip. Defaults to three poll intervals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_timeout: Option<f64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_device: 5000,
            port_driver: 8080,
            poll_interval: 1.0,
            log_file: Some(PathBuf::from("out.log")),
            log_level: "INFO".to_string(),
            reply_timeout: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate a YAML document. An empty document yields the defaults.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let interval = seconds("poll_interval", self.poll_interval)?;
        match self.reply_timeout {
            Some(timeout) => {
                seconds("reply_timeout", timeout)?;
            }
            None => {
                interval
                    .checked_mul(3)
                    .context("poll_interval is too large to derive reply_timeout")?;
            }
        }
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        Ok(())
    }

    /// Saturates instead of panicking on values `validate` would reject
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval).unwrap_or(Duration::MAX)
    }

    pub fn reply_timeout(&self) -> Duration {
        match self.reply_timeout {
            Some(secs) => Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX),
            None => self.poll_interval().saturating_mul(3),
        }
    }

    /// Translate `log_level` into a tracing filter directive
    ///
    /// Accepts the level names used by existing config files
    /// (`WARNING`, `CRITICAL`) alongside tracing's own.
    pub fn log_directive(&self) -> String {
        level_directive(&self.log_level)
    }
}

pub fn level_directive(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "notset" => "trace".to_string(),
        other => other.to_string(),
    }
}

/// Positive number of seconds representable as a `Duration`
fn seconds(name: &str, value: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if value > 0.0 && !duration.is_zero() => Ok(duration),
        _ => bail!("{} must be a positive number of seconds, got {}", name, value),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
