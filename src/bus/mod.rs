//! Service Bus - Publish and request/reply abstractions
//!
//! This module provides a broker-agnostic [`Publisher`] that resolves
//! destinations, merges message options, runs outbound middleware, and
//! emulates request/reply over any transport implementing [`Producer`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Publisher (per destination)                │
//! │  - publish(payload, args) / request(payload, args)          │
//! │  - routing + option resolution, envelope assembly           │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Middleware chain                          │
//! │  publisher tier, then broker tier (or per-call override)    │
//! │  replies: broker scopes entered, consumed, released         │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Producer trait                          │
//! │  publish(envelope, mode) / request(envelope, timeout)       │
//! │  parse(raw) / decode(parsed)                                │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌──────────────┐   ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryBroker│   │AMQP producer│    │ Redis Streams       │
//! │  (included)  │   │ (external)  │    │    (external)       │
//! └──────────────┘   └─────────────┘    └─────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```
//! # #[cfg(feature = "memory")]
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), sourced_bus::BusError> {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sourced_bus::bus::{CallArgs, InMemoryBroker, LoggingMiddleware, Publisher, RawMessage};
//!
//! let broker = InMemoryBroker::new();
//! broker.respond("rates", |_| Some(RawMessage::new("1.08")));
//!
//! let mut publisher = Publisher::builder("rates")
//!     .exchange("fx")
//!     .broker_middleware(LoggingMiddleware::default())
//!     .build();
//! publisher.setup(Arc::new(broker.clone()), Some("pricing".into()), "/");
//!
//! let reply = publisher
//!     .request("EURUSD", CallArgs::new().timeout(Duration::from_secs(1)))
//!     .await?;
//! assert_eq!(reply.body_str(), Some("1.08"));
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "memory"))]
//! # fn main() {}
//! ```

mod destination;
#[cfg(feature = "memory")]
mod in_memory;
mod logging;
mod message;
mod middleware;
mod options;
mod producer;
mod publisher;
mod router;

pub use destination::{resolve_exchange, resolve_routing, Exchange, ExchangeType, Queue, MAX_NAME_LEN};
#[cfg(feature = "memory")]
pub use in_memory::{InMemoryBroker, REPLY_QUEUE};
pub use logging::{LoggingConfig, LoggingMiddleware};
pub use message::{
    gen_correlation_id, Confirmation, Delivery, Envelope, Headers, ParsedMessage, Payload,
    RawMessage, SourceType, CONTENT_TYPE_BITCODE, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT,
};
pub use middleware::{
    compose_consume, compose_publish, outbound_layer, return_input, BoxFuture, BrokerMiddleware,
    ConsumeCall, ConsumeNext, MessageScope, Next, PublishCall, PublishMiddleware, ScopeStack,
};
pub use options::{MessageOptions, PublisherConfig};
pub use producer::{CallMode, LegacyRpc, Producer, DEFAULT_REQUEST_TIMEOUT};
pub use publisher::{CallArgs, Publisher, PublisherBuilder};
pub use router::Router;
