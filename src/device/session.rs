//! DeviceSession - sole owner of the device connection
//!
//! Every command, from control requests and from the poller, goes through
//! one async mutex held for the full write + optional reply read. Compound
//! operations take a [`DeviceTransaction`] and keep the lock across all of
//! their commands, so nothing can be interleaved between them.
//!
//! Any I/O failure drops the link and marks the session disconnected. The
//! session never reconnects on its own: the poller calls [`DeviceSession::connect`],
//! control requests just surface the error.

use parking_lot::RwLock;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::command::Command;
use super::link::{Connector, DeviceLink, TcpConnector};
use super::{ConnectionPhase, PhaseCallback};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result, TransportError};

pub struct DeviceSession {
    connector: Box<dyn Connector>,
    link: Mutex<Option<DeviceLink>>,
    phase: RwLock<ConnectionPhase>,
    phase_callbacks: RwLock<Vec<PhaseCallback>>,
    retry_interval: Duration,
    reply_timeout: Duration,
}

impl DeviceSession {
    /// Create a disconnected session
    ///
    /// # Arguments
    /// * `connector` - Opens the transport
    /// * `retry_interval` - Delay between connect attempts
    /// * `reply_timeout` - Deadline for one command round trip
    pub fn new(
        connector: impl Connector + 'static,
        retry_interval: Duration,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            connector: Box::new(connector),
            link: Mutex::new(None),
            phase: RwLock::new(ConnectionPhase::Disconnected),
            phase_callbacks: RwLock::new(Vec::new()),
            retry_interval,
            reply_timeout,
        }
    }

    /// TCP session for the configured device
    pub fn from_config(config: &GatewayConfig) -> Self {
        let connector = TcpConnector::new(
            config.host.clone(),
            config.port_device,
            config.reply_timeout(),
        );
        Self::new(connector, config.poll_interval(), config.reply_timeout())
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.read()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == ConnectionPhase::Connected
    }

    /// Register a callback invoked on every phase change
    pub fn subscribe_phase(&self, callback: PhaseCallback) {
        self.phase_callbacks.write().push(callback);
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        {
            let mut current = self.phase.write();
            if *current == phase {
                return;
            }
            *current = phase;
        }
        for callback in self.phase_callbacks.read().iter() {
            callback(phase);
        }
    }

    /// Connect, retrying every `retry_interval` until it succeeds
    ///
    /// Any existing link is dropped first, so this is also the reconnect path.
    /// There is no retry ceiling and no backoff growth.
    pub async fn connect(&self) {
        self.disconnect().await;

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.try_connect(attempt).await {
                Ok(()) => return,
                Err(e) => {
                    error!("Device disconnected, reconnecting...");
                    debug!("Connect attempt #{} failed: {}", attempt, e);
                    sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Single connect attempt
    async fn try_connect(&self, attempt: usize) -> std::result::Result<(), TransportError> {
        self.set_phase(ConnectionPhase::Connecting { attempt });

        match self.connector.connect().await {
            Ok(link) => {
                // Connected must be published before a command can fail on the link
                let mut current = self.link.lock().await;
                *current = Some(link);
                self.set_phase(ConnectionPhase::Connected);
                drop(current);
                info!("Device connected, start polling...");
                Ok(())
            }
            Err(source) => {
                self.set_phase(ConnectionPhase::Disconnected);
                Err(TransportError::Connect {
                    endpoint: self.endpoint(),
                    source,
                })
            }
        }
    }

    /// Drop the current link, if any
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        if link.take().is_some() {
            debug!("Closed device connection to {}", self.endpoint());
        }
        self.set_phase(ConnectionPhase::Disconnected);
    }

    /// Acquire exclusive access for a sequence of commands
    ///
    /// The connection stays locked until the returned guard is dropped.
    pub async fn transaction(&self) -> DeviceTransaction<'_> {
        DeviceTransaction {
            session: self,
            link: self.link.lock().await,
        }
    }

    /// Send one command; queries return their reply line
    pub async fn execute(&self, command: &Command) -> Result<Option<String>> {
        self.transaction().await.execute(command).await
    }
}

/// Exclusive hold on the device connection
pub struct DeviceTransaction<'a> {
    session: &'a DeviceSession,
    link: MutexGuard<'a, Option<DeviceLink>>,
}

impl DeviceTransaction<'_> {
    /// Send one command while holding the connection
    ///
    /// On failure the link is dropped and the session marked disconnected;
    /// later calls in the same transaction fail with `NotConnected`.
    pub async fn execute(&mut self, command: &Command) -> Result<Option<String>> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        debug!("[send_cmd] {}", command);

        let deadline = self.session.reply_timeout;
        let outcome = match timeout(deadline, round_trip(link, command)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(deadline)),
        };

        match outcome {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!("Device I/O failed on {:?}: {}", command.text(), e);
                self.link.take();
                self.session.set_phase(ConnectionPhase::Disconnected);
                Err(GatewayError::Transport(e))
            }
        }
    }
}

async fn round_trip(
    link: &mut DeviceLink,
    command: &Command,
) -> std::result::Result<Option<String>, TransportError> {
    link.send_line(command.text()).await?;
    if command.is_query() {
        link.read_line().await.map(Some)
    } else {
        Ok(None)
    }
}
