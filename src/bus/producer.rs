//! Producer contract: the transport a publisher delegates to.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::message::{Delivery, Envelope, ParsedMessage, RawMessage};
use crate::error::BusError;

/// Reply deadline for a request when neither the call nor the publisher
/// defaults set a timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How an outbound call expects the transport to behave.
///
/// Chosen once per call; this is the only place publish and request branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallMode {
    /// Send and return the transport's acknowledgement, if any.
    FireAndForget,
    /// Deprecated blocking RPC through `publish`. With `timeout: None` the
    /// reply is awaited without a deadline.
    LegacyBlockingReply {
        timeout: Option<Duration>,
        raise_timeout: bool,
    },
    /// `request`: send and await the correlated reply.
    ExplicitRequest { timeout: Duration },
}

/// The deprecated `rpc` / `rpc_timeout` / `raise_timeout` flags of `publish`.
///
/// Kept only so old call sites keep working; translated into a [`CallMode`]
/// before anything else looks at it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacyRpc {
    /// Whether to wait for a reply in blocking mode.
    pub rpc: bool,
    /// Reply waiting time.
    pub rpc_timeout: Option<Duration>,
    /// Fail with `RequestTimeout` instead of returning `Delivery::NoReply`.
    pub raise_timeout: bool,
}

impl Default for LegacyRpc {
    fn default() -> Self {
        Self {
            rpc: false,
            rpc_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            raise_timeout: false,
        }
    }
}

impl LegacyRpc {
    /// Blocking RPC with the given reply timeout.
    pub fn blocking(rpc_timeout: Option<Duration>, raise_timeout: bool) -> Self {
        Self {
            rpc: true,
            rpc_timeout,
            raise_timeout,
        }
    }
}

impl From<LegacyRpc> for CallMode {
    fn from(legacy: LegacyRpc) -> Self {
        if legacy.rpc {
            CallMode::LegacyBlockingReply {
                timeout: legacy.rpc_timeout,
                raise_timeout: legacy.raise_timeout,
            }
        } else {
            CallMode::FireAndForget
        }
    }
}

/// Trait for the transport behind a publisher.
///
/// Implementations might include:
/// - `InMemoryBroker` - For testing and single-process scenarios
/// - an AMQP producer over a channel pool
/// - a Redis Streams producer
///
/// The transport has no native request/reply: `request` sends with the
/// envelope's correlation id and collects the reply however it likes
/// (ephemeral reply queue, shared queue filtered by correlation id). It must
/// release whatever it listens on when the future completes or is dropped.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Send an envelope. `mode` is never `ExplicitRequest`; legacy blocking
    /// modes are forwarded unchanged.
    async fn publish(&self, envelope: Envelope, mode: CallMode) -> Result<Delivery, BusError>;

    /// Send an envelope and wait for the reply carrying its correlation id.
    ///
    /// Fails with [`BusError::RequestTimeout`] once `timeout` elapses.
    async fn request(&self, envelope: Envelope, timeout: Duration)
        -> Result<RawMessage, BusError>;

    /// Turn a transport message into a [`ParsedMessage`].
    async fn parse(&self, raw: RawMessage) -> Result<ParsedMessage, BusError>;

    /// Decode the body of a parsed message.
    async fn decode(&self, message: &ParsedMessage) -> Result<Value, BusError>;
}
