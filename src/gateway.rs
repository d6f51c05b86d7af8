//! Gateway - owns the device session, the telemetry cache and the configuration
//!
//! Handed by reference to the poller and the HTTP layer. Control operations
//! never reconnect: a transport failure is returned to the caller and the
//! poller restores the connection on its next cycle.

use std::sync::Arc;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::device::{Channel, Command, DeviceSession};
use crate::error::{GatewayError, Result};
use crate::poller::Poller;
use crate::state::{StateSnapshot, StateStore};

#[derive(Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    session: Arc<DeviceSession>,
    store: StateStore,
}

impl Gateway {
    /// Gateway talking TCP to the configured device
    pub fn new(config: GatewayConfig) -> Self {
        let session = DeviceSession::from_config(&config);
        Self::with_session(config, session)
    }

    /// Gateway over a custom session (alternative transports, tests)
    pub fn with_session(config: GatewayConfig, session: DeviceSession) -> Self {
        Self {
            config: Arc::new(config),
            session: Arc::new(session),
            store: StateStore::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Poller feeding this gateway's store
    pub fn poller(&self) -> Poller {
        Poller::new(
            Arc::clone(&self.session),
            self.store.clone(),
            self.config.poll_interval(),
        )
    }

    /// Configure current and voltage, then enable the output
    ///
    /// The three commands go out back-to-back under one transaction.
    pub async fn power_on(&self, channel: Channel, current: f64, voltage: f64) -> Result<()> {
        validate_setpoint("current", current)?;
        validate_setpoint("voltage", voltage)?;
        debug!("[power_on] {}, {:?}, {:?}", channel, current, voltage);

        let mut tx = self.session.transaction().await;
        tx.execute(&Command::set_current(channel, current)).await?;
        tx.execute(&Command::set_voltage(channel, voltage)).await?;
        tx.execute(&Command::set_output(channel, true)).await?;
        Ok(())
    }

    pub async fn power_off(&self, channel: Channel) -> Result<()> {
        debug!("[power_off] {}", channel);
        self.session
            .execute(&Command::set_output(channel, false))
            .await?;
        Ok(())
    }

    /// Cached telemetry; channels never polled are absent
    pub fn get_state(&self) -> StateSnapshot {
        self.store.snapshot()
    }
}

fn validate_setpoint(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(GatewayError::validation(format!(
            "{} must be a finite, non-negative number, got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests;
