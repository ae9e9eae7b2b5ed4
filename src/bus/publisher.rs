//! Publisher facade: envelope assembly, middleware, and request/reply.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use super::destination::{resolve_exchange, resolve_routing, Exchange, Queue};
use super::message::{
    gen_correlation_id, Delivery, Envelope, ParsedMessage, Payload, RawMessage, SourceType,
};
use super::middleware::{
    compose_consume, compose_publish, outbound_layer, return_input, BoxFuture, BrokerMiddleware,
    PublishCall, PublishMiddleware, ScopeStack,
};
use super::options::{MessageOptions, PublisherConfig};
use super::producer::{CallMode, LegacyRpc, Producer, DEFAULT_REQUEST_TIMEOUT};
use crate::error::BusError;

/// Per-call arguments for [`Publisher::publish`] and [`Publisher::request`].
///
/// Everything is optional; unset fields fall back to the publisher's bindings
/// and defaults.
///
/// ```
/// use std::time::Duration;
/// use sourced_bus::bus::CallArgs;
///
/// let args = CallArgs::new()
///     .routing_key("orders.created")
///     .header("tenant", "acme")
///     .timeout(Duration::from_secs(5));
/// ```
#[derive(Clone, Default)]
pub struct CallArgs {
    queue: Option<Queue>,
    exchange: Option<Exchange>,
    routing_key: Option<String>,
    correlation_id: Option<String>,
    message_id: Option<String>,
    timestamp: Option<SystemTime>,
    extra_middlewares: Vec<Arc<dyn PublishMiddleware>>,
    options: MessageOptions,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish to this queue's routing instead of the bound queue's.
    pub fn queue(mut self, queue: impl Into<Queue>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn exchange(mut self, exchange: impl Into<Exchange>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Explicit routing key; beats every other routing source.
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Add a middleware for this call only.
    ///
    /// A non-empty per-call list replaces the broker tier for the call; it
    /// is not merged with it.
    pub fn middleware(mut self, middleware: impl PublishMiddleware + 'static) -> Self {
        self.extra_middlewares.push(Arc::new(middleware));
        self
    }

    /// Replace the per-call middleware list.
    pub fn middlewares(mut self, middlewares: Vec<Arc<dyn PublishMiddleware>>) -> Self {
        self.extra_middlewares = middlewares;
        self
    }

    /// Per-call option layer.
    pub fn options(mut self, options: MessageOptions) -> Self {
        self.options = options;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.header(key, value);
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.options = self.options.timeout(timeout);
        self
    }
}

/// Builder for [`Publisher`].
pub struct PublisherBuilder {
    queue: Arc<Queue>,
    exchange: Exchange,
    routing_key: String,
    options: MessageOptions,
    middlewares: Vec<Arc<dyn PublishMiddleware>>,
    broker_middlewares: Vec<Arc<dyn BrokerMiddleware>>,
}

impl PublisherBuilder {
    pub fn exchange(mut self, exchange: impl Into<Exchange>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Default routing key; beats the queue's routing.
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    /// Stored default options.
    pub fn options(mut self, options: MessageOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a publisher-level middleware (always applied).
    pub fn middleware(mut self, middleware: impl PublishMiddleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Register a broker-level middleware.
    pub fn broker_middleware(mut self, middleware: impl BrokerMiddleware + 'static) -> Self {
        self.broker_middlewares.push(Arc::new(middleware));
        self
    }

    /// Share broker-level middlewares already held elsewhere (e.g. by a broker).
    pub fn broker_middlewares(mut self, middlewares: &[Arc<dyn BrokerMiddleware>]) -> Self {
        self.broker_middlewares.extend(middlewares.iter().cloned());
        self
    }

    pub fn build(self) -> Publisher {
        let mut options = self.options;
        let reply_to = options.reply_to.take();
        Publisher {
            queue: self.queue,
            exchange: self.exchange,
            routing_key: self.routing_key,
            message_options: options,
            reply_to,
            middlewares: self.middlewares,
            broker_middlewares: self.broker_middlewares,
            producer: None,
            app_id: None,
            virtual_host: String::new(),
        }
    }
}

/// Publishes to one bound destination through a pluggable [`Producer`].
///
/// Constructed unconfigured; [`Publisher::setup`] hands it a producer before
/// any traffic. After that its configuration is read-only, so one publisher
/// can serve many concurrent calls behind an `Arc`.
///
/// ## Example
///
/// ```
/// # #[cfg(feature = "memory")]
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::sync::Arc;
/// use sourced_bus::bus::{CallArgs, InMemoryBroker, Publisher};
///
/// let broker = InMemoryBroker::new();
/// let mut publisher = Publisher::builder("orders").exchange("events").build();
/// publisher.setup(Arc::new(broker.clone()), Some("checkout".into()), "/");
///
/// publisher
///     .publish("hi", CallArgs::new().routing_key("orders.created"))
///     .await
///     .unwrap();
///
/// let sent = broker.published();
/// assert_eq!(sent[0].routing_key, "orders.created");
/// assert_eq!(sent[0].exchange, "events");
/// # }
/// # #[cfg(not(feature = "memory"))]
/// # fn main() {}
/// ```
pub struct Publisher {
    queue: Arc<Queue>,
    exchange: Exchange,
    routing_key: String,
    message_options: MessageOptions,
    reply_to: Option<String>,
    middlewares: Vec<Arc<dyn PublishMiddleware>>,
    broker_middlewares: Vec<Arc<dyn BrokerMiddleware>>,
    producer: Option<Arc<dyn Producer>>,
    app_id: Option<String>,
    virtual_host: String,
}

impl Publisher {
    /// Start building a publisher bound to `queue`.
    pub fn builder(queue: impl Into<Queue>) -> PublisherBuilder {
        Self::builder_shared(Arc::new(queue.into()))
    }

    /// Start building a publisher bound to a descriptor shared with others.
    pub fn builder_shared(queue: Arc<Queue>) -> PublisherBuilder {
        PublisherBuilder {
            queue,
            exchange: Exchange::default(),
            routing_key: String::new(),
            options: MessageOptions::default(),
            middlewares: Vec::new(),
            broker_middlewares: Vec::new(),
        }
    }

    /// Build a publisher from a declarative config.
    pub fn from_config(config: &PublisherConfig) -> Result<PublisherBuilder, BusError> {
        let queue = Queue::validate(config.queue.as_str())?;
        let exchange = Exchange::validate(config.exchange.as_str())?.with_kind(config.exchange_type);
        Ok(Self::builder(queue)
            .exchange(exchange)
            .routing_key(config.routing_key.clone())
            .options(config.message_options()))
    }

    /// Hand the publisher its producer. Must happen before any traffic.
    ///
    /// Calling it again overwrites the previous configuration.
    pub fn setup(
        &mut self,
        producer: Arc<dyn Producer>,
        app_id: Option<String>,
        virtual_host: impl Into<String>,
    ) {
        self.producer = Some(producer);
        self.app_id = app_id;
        self.virtual_host = virtual_host.into();
    }

    pub fn is_connected(&self) -> bool {
        self.producer.is_some()
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// The bound queue descriptor, shareable with other publishers.
    pub fn shared_queue(&self) -> Arc<Queue> {
        Arc::clone(&self.queue)
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// The routing this publisher sends with when a call does not override it.
    pub fn routing(&self) -> &str {
        if self.routing_key.is_empty() {
            self.queue.routing()
        } else {
            &self.routing_key
        }
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    /// Stored defaults, `reply_to` excluded.
    pub fn message_options(&self) -> &MessageOptions {
        &self.message_options
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Re-bind to a copy of the queue with `prefix` prepended to its name.
    ///
    /// The previous descriptor is not modified; other holders of it keep
    /// resolving to the old name.
    pub fn add_prefix(&mut self, prefix: &str) {
        self.queue = Arc::new(self.queue.with_prefix(prefix));
    }

    /// Send `payload` and return whatever the producer returned.
    pub async fn publish(
        &self,
        payload: impl Into<Payload>,
        args: CallArgs,
    ) -> Result<Delivery, BusError> {
        self.publish_with_mode(payload.into(), args, CallMode::FireAndForget)
            .await
    }

    /// `publish` with the old blocking-RPC flags.
    ///
    /// The flags are forwarded to the producer as
    /// [`CallMode::LegacyBlockingReply`]. Use [`Publisher::request`] instead.
    #[deprecated(note = "use `Publisher::request` instead")]
    pub async fn publish_rpc(
        &self,
        payload: impl Into<Payload>,
        args: CallArgs,
        legacy: LegacyRpc,
    ) -> Result<Delivery, BusError> {
        let mode = CallMode::from(legacy);
        if mode != CallMode::FireAndForget {
            warn!(
                routing = %self.routing(),
                "blocking RPC through `publish` is deprecated, use `request` instead"
            );
        }
        self.publish_with_mode(payload.into(), args, mode).await
    }

    async fn publish_with_mode(
        &self,
        payload: Payload,
        args: CallArgs,
        mode: CallMode,
    ) -> Result<Delivery, BusError> {
        let producer = self.producer()?;

        let mut defaults = self.message_options.clone();
        defaults.reply_to = self.reply_to.clone();
        let envelope = self.build_envelope(payload, &args, &defaults)?;

        debug!(
            correlation_id = %envelope.correlation_id,
            routing_key = %envelope.routing_key,
            exchange = %envelope.exchange,
            ?mode,
            "publishing message"
        );

        let call = compose_publish(
            base_call(producer, mode),
            self.outbound_layers(args.extra_middlewares),
        );
        call(envelope).await
    }

    /// Send `payload` and wait for the correlated reply.
    ///
    /// The reply deadline is the merged `timeout` option, or
    /// [`DEFAULT_REQUEST_TIMEOUT`]. Expiry fails with
    /// [`BusError::RequestTimeout`]; it is never retried here.
    pub async fn request(
        &self,
        payload: impl Into<Payload>,
        args: CallArgs,
    ) -> Result<ParsedMessage, BusError> {
        let producer = self.producer()?;

        let mut envelope = self.build_envelope(payload.into(), &args, &self.message_options)?;
        if envelope.options.reply_to.take().is_some() {
            debug!("`reply_to` is chosen by the producer on request, ignoring it");
        }
        let timeout = envelope.options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        debug!(
            correlation_id = %envelope.correlation_id,
            routing_key = %envelope.routing_key,
            exchange = %envelope.exchange,
            ?timeout,
            "sending request"
        );

        let call = compose_publish(
            base_call(Arc::clone(&producer), CallMode::ExplicitRequest { timeout }),
            self.outbound_layers(args.extra_middlewares),
        );
        let raw = match call(envelope).await? {
            Delivery::Reply(raw) => raw,
            other => {
                return Err(BusError::transport(format!(
                    "request chain returned {:?} instead of a reply",
                    other
                )))
            }
        };

        self.consume_reply(producer.as_ref(), raw).await
    }

    /// Run a reply through the broker tier's scopes.
    ///
    /// Scopes are entered in reverse registration order and always released,
    /// whether parsing, decoding, or a scope fails.
    async fn consume_reply(
        &self,
        producer: &dyn Producer,
        raw: RawMessage,
    ) -> Result<ParsedMessage, BusError> {
        let mut stack = ScopeStack::new();
        for middleware in self.broker_middlewares.iter().rev() {
            if let Err(err) = stack.enter(middleware.scope(Some(&raw))).await {
                let _ = stack.release(Some(&err)).await;
                return Err(err);
            }
        }

        let outcome = parse_in_scope(producer, &stack, raw).await;
        let released = stack.release(outcome.as_ref().err()).await;
        let message = outcome?;
        released?;
        Ok(message)
    }

    fn producer(&self) -> Result<Arc<dyn Producer>, BusError> {
        self.producer.clone().ok_or(BusError::NotConnected)
    }

    fn build_envelope(
        &self,
        payload: Payload,
        args: &CallArgs,
        defaults: &MessageOptions,
    ) -> Result<Envelope, BusError> {
        let routing_key = resolve_routing(
            args.routing_key.as_deref(),
            &self.routing_key,
            args.queue.as_ref(),
            &self.queue,
        )?;
        let exchange = resolve_exchange(args.exchange.as_ref(), &self.exchange)?;

        let (bytes, implied_content_type) = payload.into_parts();
        let mut options = defaults.merge(&args.options);
        if options.content_type.is_none() {
            options.content_type = implied_content_type;
        }

        Ok(Envelope {
            payload: bytes,
            routing_key,
            exchange,
            correlation_id: non_empty(&args.correlation_id).unwrap_or_else(gen_correlation_id),
            message_id: non_empty(&args.message_id).unwrap_or_else(gen_correlation_id),
            timestamp: args.timestamp.unwrap_or_else(SystemTime::now),
            app_id: self.app_id.clone(),
            virtual_host: self.virtual_host.clone(),
            options,
        })
    }

    /// Publisher tier, then the per-call list or else the broker tier.
    fn outbound_layers(
        &self,
        extra: Vec<Arc<dyn PublishMiddleware>>,
    ) -> Vec<Arc<dyn PublishMiddleware>> {
        let mut layers = self.middlewares.clone();
        if extra.is_empty() {
            layers.extend(
                self.broker_middlewares
                    .iter()
                    .map(|middleware| outbound_layer(middleware.as_ref())),
            );
        } else {
            layers.extend(extra);
        }
        layers
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

/// Innermost call of the outbound chain.
fn base_call(producer: Arc<dyn Producer>, mode: CallMode) -> PublishCall<'static> {
    Box::new(
        move |envelope: Envelope| -> BoxFuture<'static, Result<Delivery, BusError>> {
            Box::pin(async move {
                match mode {
                    CallMode::ExplicitRequest { timeout } => {
                        let correlation_id = envelope.correlation_id.clone();
                        match tokio::time::timeout(timeout, producer.request(envelope, timeout))
                            .await
                        {
                            Ok(reply) => reply.map(Delivery::Reply),
                            Err(_) => Err(BusError::timeout(correlation_id, timeout)),
                        }
                    }
                    mode => producer.publish(envelope, mode).await,
                }
            })
        },
    )
}

/// Parse, decode, and run the inbound chain while `stack` holds the scopes.
async fn parse_in_scope(
    producer: &dyn Producer,
    stack: &ScopeStack,
    raw: RawMessage,
) -> Result<ParsedMessage, BusError> {
    let chain = compose_consume(return_input(), stack.scopes());

    let mut parsed = producer.parse(raw).await?;
    parsed.decoded = Some(producer.decode(&parsed).await?);
    parsed.source_type = SourceType::Response;
    chain(parsed).await
}

impl PartialEq for Publisher {
    fn eq(&self, other: &Self) -> bool {
        self.queue.routing() == other.queue.routing()
            && self.exchange.name == other.exchange.name
            && self.routing_key == other.routing_key
    }
}

impl Eq for Publisher {}

impl Hash for Publisher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.queue.routing().hash(state);
        self.exchange.name.hash(state);
        self.routing_key.hash(state);
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("queue", &self.queue)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("middlewares", &self.middlewares.len())
            .field("broker_middlewares", &self.broker_middlewares.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
