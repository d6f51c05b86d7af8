//! State management module - cached device telemetry
//!
//! The poller writes the latest reading of every channel into the
//! [`StateStore`]; control requests read it back without touching the device.

mod store;
mod types;

pub use store::StateStore;
pub use types::{StateSnapshot, Telemetry};
