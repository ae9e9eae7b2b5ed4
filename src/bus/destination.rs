//! Destination descriptors and routing resolution.
//!
//! Outbound routing precedence:
//!
//! ```text
//! explicit per-call routing key
//!   > publisher-bound routing key
//!     > routing of the per-call queue override
//!       > routing of the publisher-bound queue
//! ```
//!
//! Exchange: explicit per-call exchange > publisher-bound exchange.
//! Empty names count as "not given" at every level.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Longest name or routing key a transport accepts (AMQP short string).
pub const MAX_NAME_LEN: usize = 255;

fn check_name(kind: &str, name: &str) -> Result<(), BusError> {
    if name.len() > MAX_NAME_LEN {
        return Err(BusError::validation(format!(
            "{} name is {} bytes, limit is {}",
            kind,
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(BusError::validation(format!(
            "{} name {:?} contains control characters",
            kind, name
        )));
    }
    Ok(())
}

/// A named queue. Its routing is the bind routing key if set, else its name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Queue {
    pub name: String,
    /// Routing key the queue is bound with, when it differs from the name.
    pub routing_key: Option<String>,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Normalize a name or descriptor into a checked descriptor.
    pub fn validate(queue: impl Into<Queue>) -> Result<Queue, BusError> {
        let queue = queue.into();
        check_name("queue", &queue.name)?;
        if let Some(key) = &queue.routing_key {
            check_name("routing key", key)?;
        }
        Ok(queue)
    }

    /// The routing string messages for this queue are published with.
    pub fn routing(&self) -> &str {
        match self.routing_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => &self.name,
        }
    }

    /// Copy of this descriptor with `prefix` prepended to its name.
    ///
    /// The receiver is untouched, so publishers still sharing it keep
    /// resolving to the old name.
    pub fn with_prefix(&self, prefix: &str) -> Queue {
        let mut queue = self.clone();
        queue.name = format!("{}{}", prefix, queue.name);
        queue
    }
}

impl From<&str> for Queue {
    fn from(name: &str) -> Self {
        Queue::new(name)
    }
}

impl From<String> for Queue {
    fn from(name: String) -> Self {
        Queue::new(name)
    }
}

impl From<&Queue> for Queue {
    fn from(queue: &Queue) -> Self {
        queue.clone()
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue:{}", self.name)
    }
}

/// Exchange routing behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

/// A named exchange (or topic). The empty name is the default exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Exchange {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ExchangeType,
    pub durable: bool,
    pub auto_delete: bool,
}

impl Exchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: ExchangeType) -> Self {
        self.kind = kind;
        self
    }

    /// Normalize a name or descriptor into a checked descriptor.
    pub fn validate(exchange: impl Into<Exchange>) -> Result<Exchange, BusError> {
        let exchange = exchange.into();
        check_name("exchange", &exchange.name)?;
        Ok(exchange)
    }

    /// Whether this is the transport's default exchange.
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}

impl From<&str> for Exchange {
    fn from(name: &str) -> Self {
        Exchange::new(name)
    }
}

impl From<String> for Exchange {
    fn from(name: String) -> Self {
        Exchange::new(name)
    }
}

impl From<&Exchange> for Exchange {
    fn from(exchange: &Exchange) -> Self {
        exchange.clone()
    }
}

/// Resolve the routing key for one outbound call. Pure.
pub fn resolve_routing(
    explicit: Option<&str>,
    bound_routing_key: &str,
    queue_override: Option<&Queue>,
    bound_queue: &Queue,
) -> Result<String, BusError> {
    let routing = match explicit.filter(|key| !key.is_empty()) {
        Some(key) => key.to_string(),
        None if !bound_routing_key.is_empty() => bound_routing_key.to_string(),
        None => {
            let queue = queue_override
                .filter(|queue| !queue.name.is_empty())
                .unwrap_or(bound_queue);
            Queue::validate(queue)?.routing().to_string()
        }
    };
    check_name("routing key", &routing)?;
    Ok(routing)
}

/// Resolve the exchange name for one outbound call. Pure.
pub fn resolve_exchange(
    exchange_override: Option<&Exchange>,
    bound: &Exchange,
) -> Result<String, BusError> {
    match exchange_override.filter(|exchange| !exchange.is_default()) {
        Some(exchange) => Ok(Exchange::validate(exchange)?.name),
        None => Ok(bound.name.clone()),
    }
}
