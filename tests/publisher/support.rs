//! Test doubles: recording middlewares and misbehaving producers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sourced_bus::bus::{
    BrokerMiddleware, CallMode, ConsumeNext, Delivery, Envelope, MessageScope, Next,
    ParsedMessage, Producer, PublishMiddleware, RawMessage,
};
use sourced_bus::BusError;

/// Shared, ordered record of what the middlewares saw.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Publisher-level middleware that records before/after around `next`.
pub struct Tag {
    pub name: &'static str,
    pub log: Log,
}

impl Tag {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl PublishMiddleware for Tag {
    async fn publish_scope(&self, envelope: Envelope, next: Next<'_>) -> Result<Delivery, BusError> {
        self.log.push(format!("{}:before", self.name));
        let result = next.run(envelope).await;
        self.log.push(format!("{}:after", self.name));
        result
    }
}

/// Middleware that stamps a header on the way out.
pub struct Stamp(pub &'static str);

#[async_trait]
impl PublishMiddleware for Stamp {
    async fn publish_scope(&self, mut envelope: Envelope, next: Next<'_>) -> Result<Delivery, BusError> {
        envelope.options = envelope.options.header(self.0, "yes");
        next.run(envelope).await
    }
}

/// Records the `reply_to` each outbound envelope carries.
pub struct ReplyToSpy(pub Log);

#[async_trait]
impl PublishMiddleware for ReplyToSpy {
    async fn publish_scope(&self, envelope: Envelope, next: Next<'_>) -> Result<Delivery, BusError> {
        let reply_to = envelope.options.reply_to.clone();
        self.0.push(reply_to.unwrap_or_else(|| "-".to_string()));
        next.run(envelope).await
    }
}

/// Broker-level middleware whose scopes record every hook.
pub struct Probe {
    pub name: &'static str,
    pub log: Log,
    pub fail_enter: bool,
    pub fail_consume: bool,
    pub stall_consume: bool,
}

impl Probe {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
            fail_enter: false,
            fail_consume: false,
            stall_consume: false,
        }
    }

    pub fn failing_enter(mut self) -> Self {
        self.fail_enter = true;
        self
    }

    pub fn failing_consume(mut self) -> Self {
        self.fail_consume = true;
        self
    }

    /// Never finish consuming, so the reply stays in scope until cancelled.
    pub fn stalling_consume(mut self) -> Self {
        self.stall_consume = true;
        self
    }
}

impl BrokerMiddleware for Probe {
    fn scope(&self, message: Option<&RawMessage>) -> Box<dyn MessageScope> {
        Box::new(ProbeScope {
            name: self.name,
            log: self.log.clone(),
            inbound: message.is_some(),
            fail_enter: self.fail_enter,
            fail_consume: self.fail_consume,
            stall_consume: self.stall_consume,
        })
    }
}

struct ProbeScope {
    name: &'static str,
    log: Log,
    inbound: bool,
    fail_enter: bool,
    fail_consume: bool,
    stall_consume: bool,
}

#[async_trait]
impl MessageScope for ProbeScope {
    async fn enter(&mut self) -> Result<(), BusError> {
        if self.fail_enter {
            return Err(BusError::transport(format!("{} refused", self.name)));
        }
        self.log.push(format!("{}:enter", self.name));
        Ok(())
    }

    async fn exit(&mut self, error: Option<&BusError>) -> Result<(), BusError> {
        let hook = if error.is_some() { "exit-err" } else { "exit" };
        self.log.push(format!("{}:{}", self.name, hook));
        Ok(())
    }

    fn abandon(&mut self) {
        self.log.push(format!("{}:abandon", self.name));
    }

    async fn publish_scope(&self, envelope: Envelope, next: Next<'_>) -> Result<Delivery, BusError> {
        debug_assert!(!self.inbound);
        self.log.push(format!("{}:before", self.name));
        let result = next.run(envelope).await;
        self.log.push(format!("{}:after", self.name));
        result
    }

    async fn consume_scope(
        &self,
        message: ParsedMessage,
        next: ConsumeNext<'_>,
    ) -> Result<ParsedMessage, BusError> {
        self.log.push(format!("{}:consume", self.name));
        if self.fail_consume {
            return Err(BusError::transport(format!("{} rejected reply", self.name)));
        }
        if self.stall_consume {
            std::future::pending::<()>().await;
        }
        next.run(message).await
    }
}

/// A producer whose every send fails.
pub struct Unreachable;

#[async_trait]
impl Producer for Unreachable {
    async fn publish(&self, _envelope: Envelope, _mode: CallMode) -> Result<Delivery, BusError> {
        Err(BusError::transport("connection refused"))
    }

    async fn request(&self, _envelope: Envelope, _timeout: Duration) -> Result<RawMessage, BusError> {
        Err(BusError::transport("connection refused"))
    }

    async fn parse(&self, raw: RawMessage) -> Result<ParsedMessage, BusError> {
        Err(BusError::transport(format!("cannot parse {} bytes", raw.body.len())))
    }

    async fn decode(&self, _message: &ParsedMessage) -> Result<Value, BusError> {
        Ok(Value::Null)
    }
}

/// A producer that never answers requests and ignores their deadline.
pub struct Silent;

#[async_trait]
impl Producer for Silent {
    async fn publish(&self, _envelope: Envelope, _mode: CallMode) -> Result<Delivery, BusError> {
        Ok(Delivery::Sent(None))
    }

    async fn request(&self, _envelope: Envelope, _timeout: Duration) -> Result<RawMessage, BusError> {
        std::future::pending().await
    }

    async fn parse(&self, _raw: RawMessage) -> Result<ParsedMessage, BusError> {
        Err(BusError::transport("nothing to parse"))
    }

    async fn decode(&self, _message: &ParsedMessage) -> Result<Value, BusError> {
        Ok(Value::Null)
    }
}
