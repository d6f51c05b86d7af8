//! Device layer - the power supply's line protocol over one persistent connection
//!
//! - `command`: channel ids and the command vocabulary
//! - `link`: line framing over a transport, and the connector that opens it
//! - `session`: connection lifecycle and the lock that serializes all traffic

mod command;
mod link;
mod session;

use serde::Serialize;
use std::sync::Arc;

pub use command::{Channel, Command, CHANNEL_COUNT};
pub use link::{Connector, DeviceLink, TcpConnector};
pub use session::{DeviceSession, DeviceTransaction};

/// Lifecycle phase of the device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No transport open
    Disconnected,
    /// Attempting to open the transport
    Connecting { attempt: usize },
    /// Transport open and usable
    Connected,
}

/// Type alias for phase change callbacks
pub type PhaseCallback = Arc<dyn Fn(ConnectionPhase) + Send + Sync>;
