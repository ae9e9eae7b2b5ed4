//! Broker middleware that logs outbound sends and inbound replies.

use async_trait::async_trait;
use tracing::{event, trace, Level};

use super::message::{Delivery, Envelope, ParsedMessage, RawMessage};
use super::middleware::{BrokerMiddleware, ConsumeNext, MessageScope, Next};
use crate::error::BusError;

/// Emit one event at a level chosen at runtime.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {{
        let level = $level;
        if level == Level::ERROR {
            event!(Level::ERROR, $($arg)+)
        } else if level == Level::WARN {
            event!(Level::WARN, $($arg)+)
        } else if level == Level::INFO {
            event!(Level::INFO, $($arg)+)
        } else if level == Level::DEBUG {
            event!(Level::DEBUG, $($arg)+)
        } else {
            event!(Level::TRACE, $($arg)+)
        }
    }};
}

/// Settings for [`LoggingMiddleware`].
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Level for successful sends and replies. Failures always log at `WARN`.
    pub level: Level,
    /// Include the body length in events.
    pub log_body_len: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_body_len: true,
        }
    }
}

/// Structured logging for every message passing the broker tier.
///
/// ```
/// use sourced_bus::bus::{LoggingMiddleware, Publisher};
///
/// let publisher = Publisher::builder("orders")
///     .broker_middleware(LoggingMiddleware::with_level(tracing::Level::DEBUG))
///     .build();
/// ```
#[derive(Clone, Debug, Default)]
pub struct LoggingMiddleware {
    config: LoggingConfig,
}

impl LoggingMiddleware {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    pub fn with_level(level: Level) -> Self {
        Self::new(LoggingConfig {
            level,
            ..LoggingConfig::default()
        })
    }
}

impl BrokerMiddleware for LoggingMiddleware {
    fn scope(&self, message: Option<&RawMessage>) -> Box<dyn MessageScope> {
        Box::new(LoggingScope {
            config: self.config.clone(),
            correlation_id: message.and_then(|raw| raw.correlation_id.clone()),
        })
    }
}

struct LoggingScope {
    config: LoggingConfig,
    correlation_id: Option<String>,
}

#[async_trait]
impl MessageScope for LoggingScope {
    async fn enter(&mut self) -> Result<(), BusError> {
        trace!(correlation_id = ?self.correlation_id, "logging scope entered");
        Ok(())
    }

    async fn exit(&mut self, error: Option<&BusError>) -> Result<(), BusError> {
        match error {
            Some(err) => event!(
                Level::WARN,
                correlation_id = ?self.correlation_id,
                error = %err,
                "reply handling failed"
            ),
            None => trace!(correlation_id = ?self.correlation_id, "logging scope exited"),
        }
        Ok(())
    }

    async fn publish_scope(&self, envelope: Envelope, next: Next<'_>) -> Result<Delivery, BusError> {
        let correlation_id = envelope.correlation_id.clone();
        let routing_key = envelope.routing_key.clone();
        let exchange = envelope.exchange.clone();
        let body_len = self.config.log_body_len.then_some(envelope.payload.len());

        let result = next.run(envelope).await;
        match &result {
            Ok(delivery) => log_at!(
                self.config.level,
                %correlation_id,
                %routing_key,
                %exchange,
                ?body_len,
                replied = matches!(delivery, Delivery::Reply(_)),
                "message sent"
            ),
            Err(err) => event!(
                Level::WARN,
                %correlation_id,
                %routing_key,
                %exchange,
                error = %err,
                "message send failed"
            ),
        }
        result
    }

    async fn consume_scope(
        &self,
        message: ParsedMessage,
        next: ConsumeNext<'_>,
    ) -> Result<ParsedMessage, BusError> {
        let body_len = self.config.log_body_len.then_some(message.body.len());
        log_at!(
            self.config.level,
            correlation_id = ?message.correlation_id,
            content_type = ?message.content_type,
            ?body_len,
            "reply received"
        );
        next.run(message).await
    }
}
