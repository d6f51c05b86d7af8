//! Telemetry type definitions
//!
//! Defines the per-channel telemetry triple and the per-cycle snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::device::Channel;
use crate::error::GatewayError;

/// Last observed output of one channel, as reported by the device
///
/// `power` comes from the device, never computed locally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl FromStr for Telemetry {
    type Err = GatewayError;

    /// Parse a `:MEASure{ch}:ALL?` reply: `voltage, current, power`
    fn from_str(reply: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = reply.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(GatewayError::protocol(
                reply,
                format!("expected 3 comma-separated values, got {}", fields.len()),
            ));
        }

        let parse = |name: &str, field: &str| {
            field.parse::<f64>().map_err(|_| {
                GatewayError::protocol(reply, format!("{} is not a number: {:?}", name, field))
            })
        };

        Ok(Self {
            voltage: parse("voltage", fields[0])?,
            current: parse("current", fields[1])?,
            power: parse("power", fields[2])?,
        })
    }
}

/// Immutable copy of all channel telemetry at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub taken_at: DateTime<Utc>,
    pub channels: BTreeMap<Channel, Telemetry>,
}

impl StateSnapshot {
    pub fn new(channels: BTreeMap<Channel, Telemetry>) -> Self {
        Self {
            taken_at: Utc::now(),
            channels,
        }
    }

    pub fn get(&self, channel: Channel) -> Option<&Telemetry> {
        self.channels.get(&channel)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
