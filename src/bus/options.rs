//! Publish-time options and publisher configuration.
//!
//! Options come from three layers: the publisher's stored defaults, then the
//! per-call overrides. [`MessageOptions::merge`] is the only place layers are
//! combined; a field set in a later layer replaces the earlier value.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::destination::ExchangeType;
use super::message::Headers;

/// Every recognized publish-time option. Unset fields defer to earlier layers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageOptions {
    /// Message headers. A later layer replaces the whole map.
    pub headers: Option<Headers>,
    /// Require a viable destination; the transport returns the message otherwise.
    pub mandatory: Option<bool>,
    /// Require a ready consumer.
    pub immediate: Option<bool>,
    /// Send confirmation wait. On `request`, the reply deadline.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Option<Duration>,
    /// Survive a broker restart.
    pub persist: Option<bool>,
    pub priority: Option<u8>,
    /// Application-specific message type, e.g. `orders.created`.
    pub message_type: Option<String>,
    /// Derived from the payload when unset.
    pub content_type: Option<String>,
    /// Publisher connection user id, validated by the transport.
    pub user_id: Option<String>,
    /// Message lifetime.
    #[serde(rename = "expiration_ms", with = "millis")]
    pub expiration: Option<Duration>,
    /// Body encoding, e.g. `gzip`.
    pub content_encoding: Option<String>,
    /// Routing key replies should be sent to. Ignored by `request`.
    pub reply_to: Option<String>,
}

impl MessageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine two layers; fields set in `overrides` win.
    pub fn merge(&self, overrides: &MessageOptions) -> MessageOptions {
        fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }

        MessageOptions {
            headers: pick(&self.headers, &overrides.headers),
            mandatory: pick(&self.mandatory, &overrides.mandatory),
            immediate: pick(&self.immediate, &overrides.immediate),
            timeout: pick(&self.timeout, &overrides.timeout),
            persist: pick(&self.persist, &overrides.persist),
            priority: pick(&self.priority, &overrides.priority),
            message_type: pick(&self.message_type, &overrides.message_type),
            content_type: pick(&self.content_type, &overrides.content_type),
            user_id: pick(&self.user_id, &overrides.user_id),
            expiration: pick(&self.expiration, &overrides.expiration),
            content_encoding: pick(&self.content_encoding, &overrides.content_encoding),
            reply_to: pick(&self.reply_to, &overrides.reply_to),
        }
    }

    /// Add a single header, creating the map if needed.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = Some(mandatory);
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(immediate);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn content_encoding(mut self, content_encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(content_encoding.into());
        self
    }

    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Declarative publisher definition, e.g. loaded from a JSON config file.
///
/// ```
/// use sourced_bus::bus::PublisherConfig;
///
/// let config: PublisherConfig = serde_json::from_str(r#"{
///     "queue": "orders",
///     "exchange": "events",
///     "exchange_type": "topic",
///     "persist": true,
///     "headers": { "source": "checkout" }
/// }"#).unwrap();
///
/// assert!(config.mandatory);
/// assert_eq!(config.message_options().persist, Some(true));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Queue name the publisher is bound to.
    pub queue: String,
    /// Exchange name. Empty means the default exchange.
    pub exchange: String,
    pub exchange_type: ExchangeType,
    /// Default routing key; overrides the queue's routing when set.
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub persist: bool,
    pub timeout_ms: Option<u64>,
    pub reply_to: Option<String>,
    pub priority: Option<u8>,
    pub headers: Option<Headers>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub expiration_ms: Option<u64>,
    pub message_type: Option<String>,
    pub user_id: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue: String::new(),
            exchange: String::new(),
            exchange_type: ExchangeType::default(),
            routing_key: String::new(),
            mandatory: true,
            immediate: false,
            persist: false,
            timeout_ms: None,
            reply_to: None,
            priority: None,
            headers: None,
            content_type: None,
            content_encoding: None,
            expiration_ms: None,
            message_type: None,
            user_id: None,
        }
    }
}

impl PublisherConfig {
    /// The stored-defaults layer this config describes.
    pub fn message_options(&self) -> MessageOptions {
        MessageOptions {
            headers: self.headers.clone(),
            mandatory: Some(self.mandatory),
            immediate: Some(self.immediate),
            timeout: self.timeout_ms.map(Duration::from_millis),
            persist: Some(self.persist),
            priority: self.priority,
            message_type: self.message_type.clone(),
            content_type: self.content_type.clone(),
            user_id: self.user_id.clone(),
            expiration: self.expiration_ms.map(Duration::from_millis),
            content_encoding: self.content_encoding.clone(),
            reply_to: self.reply_to.clone(),
        }
    }
}

/// `Option<Duration>` as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
