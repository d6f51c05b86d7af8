//! Error taxonomy for the device layer and the control surface
//!
//! Recovery policy is chosen per kind:
//! - [`TransportError`] drops the connection; the poller reconnects.
//! - [`GatewayError::Protocol`] is a malformed reply; the poller treats it
//!   like a transport failure.
//! - [`GatewayError::Validation`] is a bad control request; it is reported to
//!   the caller and never touches the connection.
//! - [`GatewayError::Internal`] is a gateway-side fault; reported as is.

use std::time::Duration;
use thiserror::Error;

/// Socket-level failures on the device connection
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection is currently established
    #[error("device not connected")]
    NotConnected,

    /// Opening the connection failed
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The device closed the stream
    #[error("device closed the connection")]
    Closed,

    /// A write or read did not finish before the deadline
    #[error("no reply from device within {0:?}")]
    Timeout(Duration),

    /// Any other read/write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {reason} (reply: {reply:?})")]
    Protocol { reply: String, reason: String },

    #[error("{0}")]
    Validation(String),

    /// Failure inside the gateway, not caused by the request or the device
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn protocol(reply: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            reply: reply.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for failures that leave the connection unusable
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
