//! Poller - periodic telemetry refresh
//!
//! Every interval, queries channels 1..4 in order, stores each reading and
//! then emits one snapshot for the whole cycle. Any failure aborts the cycle
//! and reconnects before the next one; the loop itself never exits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::device::{Channel, Command, DeviceSession};
use crate::error::Result;
use crate::state::{StateSnapshot, StateStore, Telemetry};

/// Snapshots buffered for slow subscribers
const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

pub struct Poller {
    session: Arc<DeviceSession>,
    store: StateStore,
    interval: Duration,
    snapshot_tx: broadcast::Sender<StateSnapshot>,
}

impl Poller {
    pub fn new(session: Arc<DeviceSession>, store: StateStore, interval: Duration) -> Self {
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            session,
            store,
            interval,
            snapshot_tx,
        }
    }

    /// Receive the snapshot of every completed cycle
    pub fn subscribe(&self) -> broadcast::Receiver<StateSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Query every channel once
    ///
    /// Readings are stored as they arrive. The returned snapshot only exists
    /// if all channels were read.
    pub async fn poll_cycle(&self) -> Result<StateSnapshot> {
        let mut readings = BTreeMap::new();
        for channel in Channel::all() {
            let telemetry = self.read_channel(channel).await?;
            self.store.update(channel, telemetry);
            readings.insert(channel, telemetry);
        }
        Ok(StateSnapshot::new(readings))
    }

    async fn read_channel(&self, channel: Channel) -> Result<Telemetry> {
        let reply = self
            .session
            .execute(&Command::measure_all(channel))
            .await?
            .unwrap_or_default();
        reply.parse()
    }

    fn publish(&self, snapshot: StateSnapshot) {
        match serde_json::to_string(&snapshot.channels) {
            Ok(json) => info!("[device_state] {}", json),
            Err(e) => warn!("Failed to serialize device state: {}", e),
        }
        // No subscribers is fine
        let _ = self.snapshot_tx.send(snapshot);
    }

    /// Poll forever
    pub async fn run(self) {
        info!("Polling every {:?}", self.interval);
        loop {
            sleep(self.interval).await;

            match self.poll_cycle().await {
                Ok(snapshot) => self.publish(snapshot),
                Err(e) => {
                    warn!("Polling cycle aborted: {}", e);
                    debug!("Reconnecting to {}", self.session.endpoint());
                    self.session.connect().await;
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
