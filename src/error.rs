//! Error taxonomy for the publish / request pipeline.

use std::error::Error;
use std::time::Duration;

/// Every failure a publisher call can surface.
///
/// Callers of `request` can tell "no reply in time" ([`BusError::RequestTimeout`])
/// apart from "the transport rejected the send" ([`BusError::Transport`]) and
/// from misuse or misconfiguration (the remaining variants).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The publisher was used before `setup` handed it a producer.
    #[error("publisher is not connected yet, call `setup` first")]
    NotConnected,

    /// A queue or exchange descriptor failed validation.
    #[error("invalid destination: {message}")]
    Validation { message: String },

    /// A subscription config combines fields that cannot go together.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// No reply carrying the request's correlation id arrived in time.
    #[error("no reply for correlation id {correlation_id} within {timeout:?}")]
    RequestTimeout {
        correlation_id: String,
        timeout: Duration,
    },

    /// Anything the producer raised. Passed through as-is.
    #[error(transparent)]
    Transport(Box<dyn Error + Send + Sync>),
}

impl BusError {
    /// Wrap a transport-level failure.
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        BusError::Transport(err.into())
    }

    /// Create a validation error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        BusError::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        BusError::Configuration {
            message: message.into(),
        }
    }

    /// Create a request timeout error.
    pub fn timeout(correlation_id: impl Into<String>, timeout: Duration) -> Self {
        BusError::RequestTimeout {
            correlation_id: correlation_id.into(),
            timeout,
        }
    }

    /// Check if this error is a reply timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::RequestTimeout { .. })
    }

    /// Check if this error came from the transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, BusError::Transport(_))
    }
}
