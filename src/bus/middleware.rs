//! Middleware chain composition.
//!
//! Two tiers wrap every outbound call:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ broker tier (or per-call override), last     │  outermost
//! │   ...                                        │
//! │ publisher tier, first                        │
//! │   ┌──────────────────────────────────────┐   │
//! │   │ Producer::publish / Producer::request │   │  innermost
//! │   └──────────────────────────────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The last-registered middleware runs first and delegates inward through
//! [`Next`]. Replies to requests come back through [`MessageScope`]s acquired
//! from the broker tier and held in a [`ScopeStack`] until released.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{trace, warn};

use super::message::{Delivery, Envelope, ParsedMessage, RawMessage};
use crate::error::BusError;

/// Boxed `Send` future, the currency of the chain.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One step of the outbound chain.
pub type PublishCall<'a> =
    Box<dyn FnOnce(Envelope) -> BoxFuture<'a, Result<Delivery, BusError>> + Send + 'a>;

/// One step of the inbound (reply) chain.
pub type ConsumeCall<'a> =
    Box<dyn FnOnce(ParsedMessage) -> BoxFuture<'a, Result<ParsedMessage, BusError>> + Send + 'a>;

/// The rest of the outbound chain, handed to each middleware.
pub struct Next<'a> {
    call: PublishCall<'a>,
}

impl<'a> Next<'a> {
    pub fn new(call: PublishCall<'a>) -> Self {
        Self { call }
    }

    /// Continue inward with `envelope`.
    pub async fn run(self, envelope: Envelope) -> Result<Delivery, BusError> {
        (self.call)(envelope).await
    }
}

/// The rest of the inbound chain, handed to each scope.
pub struct ConsumeNext<'a> {
    call: ConsumeCall<'a>,
}

impl<'a> ConsumeNext<'a> {
    pub fn new(call: ConsumeCall<'a>) -> Self {
        Self { call }
    }

    /// Continue inward with `message`.
    pub async fn run(self, message: ParsedMessage) -> Result<ParsedMessage, BusError> {
        (self.call)(message).await
    }
}

/// Wraps outbound sends. Registered per publisher, or passed per call.
///
/// ## Example
///
/// ```
/// use async_trait::async_trait;
/// use sourced_bus::bus::{Delivery, Envelope, Next, PublishMiddleware};
/// use sourced_bus::BusError;
///
/// struct Stamp;
///
/// #[async_trait]
/// impl PublishMiddleware for Stamp {
///     async fn publish_scope(
///         &self,
///         mut envelope: Envelope,
///         next: Next<'_>,
///     ) -> Result<Delivery, BusError> {
///         envelope.options = envelope.options.header("stamped", "yes");
///         next.run(envelope).await
///     }
/// }
/// ```
#[async_trait]
pub trait PublishMiddleware: Send + Sync {
    async fn publish_scope(&self, envelope: Envelope, next: Next<'_>)
        -> Result<Delivery, BusError>;
}

/// Broker-level middleware: a factory of per-message scopes.
///
/// On the outbound path the scope is created with no message and only its
/// [`MessageScope::publish_scope`] is used. For a reply, a scope is created
/// from the raw reply, entered, used to wrap consumption, then released.
pub trait BrokerMiddleware: Send + Sync {
    fn scope(&self, message: Option<&RawMessage>) -> Box<dyn MessageScope>;
}

/// A per-message middleware instance.
#[async_trait]
pub trait MessageScope: Send + Sync {
    /// Acquire whatever the scope holds for the message.
    async fn enter(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Release the scope. `error` is the failure the scoped block ended with.
    async fn exit(&mut self, _error: Option<&BusError>) -> Result<(), BusError> {
        Ok(())
    }

    /// Synchronous release for a scope dropped without `exit`, e.g. when the
    /// request future is cancelled.
    fn abandon(&mut self) {}

    async fn publish_scope(&self, envelope: Envelope, next: Next<'_>) -> Result<Delivery, BusError> {
        next.run(envelope).await
    }

    async fn consume_scope(
        &self,
        message: ParsedMessage,
        next: ConsumeNext<'_>,
    ) -> Result<ParsedMessage, BusError> {
        next.run(message).await
    }
}

/// Outbound face of a broker middleware scope.
struct OutboundScope(Box<dyn MessageScope>);

#[async_trait]
impl PublishMiddleware for OutboundScope {
    async fn publish_scope(&self, envelope: Envelope, next: Next<'_>) -> Result<Delivery, BusError> {
        self.0.publish_scope(envelope, next).await
    }
}

/// Outbound layer for one call through a broker middleware.
pub fn outbound_layer(middleware: &dyn BrokerMiddleware) -> Arc<dyn PublishMiddleware> {
    Arc::new(OutboundScope(middleware.scope(None)))
}

/// Fold `layers` around `base`, in registration order.
///
/// Each layer wraps the call built so far, so the last layer ends up
/// outermost and runs first.
pub fn compose_publish<'a, I>(base: PublishCall<'a>, layers: I) -> PublishCall<'a>
where
    I: IntoIterator<Item = Arc<dyn PublishMiddleware>>,
{
    layers.into_iter().fold(base, |call, layer| {
        Box::new(
            move |envelope: Envelope| -> BoxFuture<'a, Result<Delivery, BusError>> {
                Box::pin(async move { layer.publish_scope(envelope, Next::new(call)).await })
            },
        )
    })
}

/// Inbound base call: hands the message back unchanged.
pub fn return_input<'a>() -> ConsumeCall<'a> {
    Box::new(
        |message: ParsedMessage| -> BoxFuture<'a, Result<ParsedMessage, BusError>> {
            Box::pin(async move { Ok(message) })
        },
    )
}

/// Fold entered scopes around `base`, in acquisition order.
pub fn compose_consume<'a, I>(base: ConsumeCall<'a>, scopes: I) -> ConsumeCall<'a>
where
    I: IntoIterator<Item = &'a dyn MessageScope>,
{
    scopes.into_iter().fold(base, |call, scope| {
        Box::new(
            move |message: ParsedMessage| -> BoxFuture<'a, Result<ParsedMessage, BusError>> {
                Box::pin(async move { scope.consume_scope(message, ConsumeNext::new(call)).await })
            },
        )
    })
}

/// Scopes entered for one reply, released innermost-acquired first.
///
/// [`ScopeStack::release`] is the normal exit. Anything still held when the
/// stack is dropped (cancellation, panic) is abandoned synchronously.
#[derive(Default)]
pub struct ScopeStack {
    entered: Vec<Box<dyn MessageScope>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `scope` and hold it. A scope that fails to enter is not held.
    pub async fn enter(&mut self, mut scope: Box<dyn MessageScope>) -> Result<(), BusError> {
        scope.enter().await?;
        self.entered.push(scope);
        trace!(depth = self.entered.len(), "message scope entered");
        Ok(())
    }

    /// Entered scopes, in acquisition order.
    pub fn scopes(&self) -> impl Iterator<Item = &dyn MessageScope> + '_ {
        self.entered.iter().map(|scope| scope.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entered.is_empty()
    }

    /// Exit every held scope, last entered first.
    ///
    /// All scopes are exited even if some fail; the first failure is returned.
    /// A scope stays held until its `exit` completes, so cancelling the
    /// release abandons the scope that was mid-exit along with the rest.
    pub async fn release(mut self, error: Option<&BusError>) -> Result<(), BusError> {
        let mut first_failure = None;
        while !self.entered.is_empty() {
            let depth = self.entered.len();
            let scope = self.entered.last_mut().expect("non-empty scope stack");
            trace!(depth = depth, "message scope exiting");
            let result = scope.exit(error).await;
            self.entered.pop();
            if let Err(err) = result {
                warn!(error = %err, "message scope failed to release");
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ScopeStack {
    fn drop(&mut self) {
        while let Some(mut scope) = self.entered.pop() {
            warn!("message scope abandoned before release");
            scope.abandon();
        }
    }
}
