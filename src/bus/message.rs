//! Message types flowing through the publish / request pipeline.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde_json::Value;

use super::options::MessageOptions;

/// Message headers, ordered by key.
pub type Headers = BTreeMap<String, String>;

/// Content type set by [`Payload::json`].
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type set by [`Payload::text`].
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
/// Content type set by [`Payload::bitcode`].
pub const CONTENT_TYPE_BITCODE: &str = "application/x-bitcode";

/// Generate a fresh correlation id (uuid v4, hex without dashes).
pub fn gen_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Opaque outbound body plus the content type it implies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    content_type: Option<String>,
}

impl Payload {
    /// Raw bytes with no implied content type.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            content_type: None,
        }
    }

    /// A UTF-8 text body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            content_type: Some(CONTENT_TYPE_TEXT.to_string()),
        }
    }

    /// Serialize `value` as JSON.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            bytes: serde_json::to_vec(value)?,
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
        })
    }

    /// Serialize `value` with bitcode.
    pub fn bitcode<T: serde::Serialize>(value: &T) -> Result<Self, bitcode::Error> {
        Ok(Self {
            bytes: bitcode::serialize(value)?,
            content_type: Some(CONTENT_TYPE_BITCODE.to_string()),
        })
    }

    /// The content type this payload implies, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_parts(self) -> (Vec<u8>, Option<String>) {
        (self.bytes, self.content_type)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::new(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::new(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(bytes: &[u8; N]) -> Self {
        Payload::new(bytes.to_vec())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::text(text)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::text(text)
    }
}

/// A fully resolved outbound message, ready for the producer.
///
/// The correlation id is always set by the time an envelope exists.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Serialized body.
    pub payload: Vec<u8>,
    /// Resolved routing key.
    pub routing_key: String,
    /// Resolved exchange / topic name. Empty means the default exchange.
    pub exchange: String,
    /// Per-call unique token used to match replies.
    pub correlation_id: String,
    pub message_id: String,
    pub timestamp: SystemTime,
    /// Application id from `setup`.
    pub app_id: Option<String>,
    /// Virtual host / namespace from `setup`.
    pub virtual_host: String,
    /// Merged option bag (defaults, then per-call overrides).
    pub options: MessageOptions,
}

impl Envelope {
    /// Headers from the merged options. Empty when none were set.
    pub fn headers(&self) -> Headers {
        self.options.headers.clone().unwrap_or_default()
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A message as the transport handed it back, before parsing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMessage {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    pub routing_key: String,
    pub exchange: String,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub timestamp: Option<SystemTime>,
}

impl RawMessage {
    /// Create a raw message with the given body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a header to the message.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Where a parsed message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// Consumed as an inbound request.
    Request,
    /// Received as the reply to one of our requests.
    Response,
}

/// A transport message after the producer's parser and decoder ran.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedMessage {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    pub content_type: Option<String>,
    pub source_type: SourceType,
    /// Set by the producer's decoder.
    pub decoded: Option<Value>,
    /// The original transport message.
    pub raw: RawMessage,
}

impl ParsedMessage {
    /// Decoded body, or `Value::Null` before decoding.
    pub fn decoded_body(&self) -> &Value {
        self.decoded.as_ref().unwrap_or(&Value::Null)
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Deserialize the body from JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Decode the body from bitcode binary format.
    pub fn bitcode<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.body)
    }
}

/// Broker acknowledgement of a fire-and-forget send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Confirmation {
    /// Transport-assigned delivery sequence.
    pub sequence: u64,
}

/// What the producer handed back for an outbound call.
///
/// Middlewares see and return this unchanged; the publisher only unwraps
/// `Reply` on the request path.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    /// Fire-and-forget send, optionally confirmed by the transport.
    Sent(Option<Confirmation>),
    /// A correlated reply (explicit request, or legacy blocking publish).
    Reply(RawMessage),
    /// Legacy blocking publish that timed out with `raise_timeout` off.
    NoReply,
}

impl Delivery {
    /// The reply, if this delivery carried one.
    pub fn into_reply(self) -> Option<RawMessage> {
        match self {
            Delivery::Reply(raw) => Some(raw),
            _ => None,
        }
    }

    pub fn confirmation(&self) -> Option<Confirmation> {
        match self {
            Delivery::Sent(confirmation) => *confirmation,
            _ => None,
        }
    }
}
