//! StateStore - latest telemetry per channel
//!
//! Written by the poller only; read by control requests. Each channel entry
//! is replaced atomically, readers never see a half-written triple.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::{StateSnapshot, Telemetry};
use crate::device::Channel;

/// Latest telemetry per channel, absent until first polled
#[derive(Clone, Default)]
pub struct StateStore {
    channels: Arc<DashMap<Channel, Telemetry>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored telemetry for a channel
    pub(crate) fn update(&self, channel: Channel, telemetry: Telemetry) {
        self.channels.insert(channel, telemetry);
    }

    pub fn get(&self, channel: Channel) -> Option<Telemetry> {
        self.channels.get(&channel).map(|entry| *entry.value())
    }

    /// Copy of every channel polled so far
    pub fn snapshot(&self) -> StateSnapshot {
        let channels: BTreeMap<Channel, Telemetry> = self
            .channels
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        StateSnapshot::new(channels)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
