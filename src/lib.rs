//! PSU GW - HTTP gateway for a four-channel bench power supply
//!
//! Keeps one persistent line-protocol connection to the instrument, polls
//! telemetry in the background and serves control requests over HTTP.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod poller;
pub mod simulator;
pub mod state;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result, TransportError};
pub use gateway::Gateway;
