//! In-memory broker for testing and single-process scenarios.
//!
//! Implements [`Producer`] over an append-only log of envelopes. Replies are
//! produced by responders registered per routing key, or delivered by hand
//! with [`InMemoryBroker::deliver_reply`], and matched to waiting requests by
//! correlation id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::message::{
    Confirmation, Delivery, Envelope, ParsedMessage, RawMessage, SourceType, CONTENT_TYPE_JSON,
};
use super::producer::{CallMode, Producer};
use crate::error::BusError;

/// Reply address the broker stamps on requests.
pub const REPLY_QUEUE: &str = "in-memory.reply-to";

type Responder = Arc<dyn Fn(&Envelope) -> Option<RawMessage> + Send + Sync>;

/// A waiter's token and the channel its reply goes to.
type Waiter = (u64, oneshot::Sender<RawMessage>);

struct Inner {
    log: RwLock<Vec<Envelope>>,
    sequence: AtomicU64,
    waiters: AtomicU64,
    pending: Mutex<HashMap<String, Waiter>>,
    responders: RwLock<HashMap<String, Responder>>,
    offline: AtomicBool,
}

/// In-memory broker.
///
/// Cheap to clone; clones share the same log, responders, and pending
/// replies.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use sourced_bus::bus::{CallArgs, InMemoryBroker, Publisher, RawMessage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let broker = InMemoryBroker::new();
/// broker.respond("ping", |_| Some(RawMessage::new("pong")));
///
/// let mut publisher = Publisher::builder("ping").build();
/// publisher.setup(Arc::new(broker.clone()), None, "/");
///
/// let reply = publisher.request("hi", CallArgs::new()).await.unwrap();
/// assert_eq!(reply.body_str(), Some("pong"));
/// assert_eq!(broker.pending_replies(), 0);
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                log: RwLock::new(Vec::new()),
                sequence: AtomicU64::new(0),
                waiters: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                responders: RwLock::new(HashMap::new()),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Answer requests sent with `routing_key`.
    ///
    /// Only requests and legacy blocking publishes reach the responder;
    /// fire-and-forget publishes are logged and nothing more. A reply without
    /// a correlation id gets the request's. Replacing an existing responder
    /// is allowed.
    pub fn respond<F>(&self, routing_key: impl Into<String>, responder: F)
    where
        F: Fn(&Envelope) -> Option<RawMessage> + Send + Sync + 'static,
    {
        self.inner
            .responders
            .write()
            .insert(routing_key.into(), Arc::new(responder));
    }

    /// Hand `reply` to the request waiting on its correlation id.
    ///
    /// Returns false when nobody is waiting, e.g. the request already timed
    /// out. Such replies are dropped.
    pub fn deliver_reply(&self, reply: RawMessage) -> bool {
        let Some(correlation_id) = reply.correlation_id.clone() else {
            debug!("dropping reply without correlation id");
            return false;
        };
        let waiter = self.inner.pending.lock().remove(&correlation_id);
        match waiter {
            Some((_, sender)) => sender.send(reply).is_ok(),
            None => {
                debug!(%correlation_id, "dropping reply nobody waits for");
                false
            }
        }
    }

    /// Fail every send with a transport error while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Every envelope sent so far, in order.
    pub fn published(&self) -> Vec<Envelope> {
        self.inner.log.read().clone()
    }

    /// Find the first envelope sent with `routing_key`.
    pub fn find_by_routing(&self, routing_key: &str) -> Option<Envelope> {
        self.inner
            .log
            .read()
            .iter()
            .find(|e| e.routing_key == routing_key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.log.read().is_empty()
    }

    /// Requests currently waiting for a reply.
    pub fn pending_replies(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Clear the log (useful for test cleanup). Responders stay registered.
    pub fn clear(&self) {
        self.inner.log.write().clear();
    }

    fn ensure_online(&self) -> Result<(), BusError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(BusError::transport("in-memory broker is offline"));
        }
        Ok(())
    }

    /// Append to the log and return the assigned sequence.
    fn append(&self, envelope: &Envelope) -> u64 {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.log.write().push(envelope.clone());
        trace!(sequence, routing_key = %envelope.routing_key, "envelope appended");
        sequence
    }

    fn answer(&self, envelope: &Envelope) {
        let responder = self
            .inner
            .responders
            .read()
            .get(&envelope.routing_key)
            .cloned();
        if let Some(mut reply) = responder.and_then(|respond| respond(envelope)) {
            if reply.correlation_id.is_none() {
                reply.correlation_id = Some(envelope.correlation_id.clone());
            }
            self.deliver_reply(reply);
        }
    }

    /// Register a waiter for `correlation_id`. Each waiter gets a fresh token
    /// so it only ever unregisters its own entry.
    fn wait_for(&self, correlation_id: &str) -> Result<PendingReply, BusError> {
        let mut pending = self.inner.pending.lock();
        if pending.contains_key(correlation_id) {
            return Err(BusError::transport(format!(
                "a request with correlation id {} is already waiting",
                correlation_id
            )));
        }
        let token = self.inner.waiters.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        pending.insert(correlation_id.to_string(), (token, sender));
        Ok(PendingReply {
            inner: Arc::clone(&self.inner),
            correlation_id: correlation_id.to_string(),
            token,
            receiver: Some(receiver),
        })
    }

    /// Send and wait for the reply. `None` waits without a deadline.
    async fn send_and_wait(
        &self,
        mut envelope: Envelope,
        timeout: Option<Duration>,
    ) -> Result<RawMessage, BusError> {
        self.ensure_online()?;
        envelope.options.reply_to = Some(REPLY_QUEUE.to_string());

        let mut pending = self.wait_for(&envelope.correlation_id)?;
        self.append(&envelope);
        self.answer(&envelope);

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, pending.recv()).await {
                Ok(reply) => reply,
                Err(_) => Err(BusError::timeout(envelope.correlation_id, limit)),
            },
            None => pending.recv().await,
        }
    }
}

/// A registered reply waiter. Dropping it unregisters the correlation id
/// unless a later request has claimed it since.
struct PendingReply {
    inner: Arc<Inner>,
    correlation_id: String,
    token: u64,
    receiver: Option<oneshot::Receiver<RawMessage>>,
}

impl PendingReply {
    async fn recv(&mut self) -> Result<RawMessage, BusError> {
        let receiver = self
            .receiver
            .as_mut()
            .ok_or_else(|| BusError::transport("reply already received"))?;
        let reply = receiver
            .await
            .map_err(|_| BusError::transport("reply channel closed"))?;
        self.receiver = None;
        Ok(reply)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        let mut pending = self.inner.pending.lock();
        let owned = pending
            .get(&self.correlation_id)
            .is_some_and(|(token, _)| *token == self.token);
        if owned {
            pending.remove(&self.correlation_id);
            trace!(correlation_id = %self.correlation_id, "reply waiter released");
        }
    }
}

#[async_trait]
impl Producer for InMemoryBroker {
    async fn publish(&self, envelope: Envelope, mode: CallMode) -> Result<Delivery, BusError> {
        match mode {
            CallMode::LegacyBlockingReply {
                timeout,
                raise_timeout,
            } => match self.send_and_wait(envelope, timeout).await {
                Ok(reply) => Ok(Delivery::Reply(reply)),
                Err(err) if err.is_timeout() && !raise_timeout => Ok(Delivery::NoReply),
                Err(err) => Err(err),
            },
            CallMode::ExplicitRequest { timeout } => self
                .send_and_wait(envelope, Some(timeout))
                .await
                .map(Delivery::Reply),
            CallMode::FireAndForget => {
                self.ensure_online()?;
                let sequence = self.append(&envelope);
                Ok(Delivery::Sent(Some(Confirmation { sequence })))
            }
        }
    }

    async fn request(&self, envelope: Envelope, timeout: Duration) -> Result<RawMessage, BusError> {
        self.send_and_wait(envelope, Some(timeout)).await
    }

    async fn parse(&self, raw: RawMessage) -> Result<ParsedMessage, BusError> {
        Ok(ParsedMessage {
            body: raw.body.clone(),
            headers: raw.headers.clone(),
            correlation_id: raw.correlation_id.clone(),
            message_id: raw.message_id.clone(),
            content_type: raw.content_type.clone(),
            source_type: SourceType::Request,
            decoded: None,
            raw,
        })
    }

    async fn decode(&self, message: &ParsedMessage) -> Result<Value, BusError> {
        if message.content_type.as_deref() == Some(CONTENT_TYPE_JSON) {
            return serde_json::from_slice(&message.body).map_err(BusError::transport);
        }
        Ok(match std::str::from_utf8(&message.body) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::String(base64::engine::general_purpose::STANDARD.encode(&message.body)),
        })
    }
}
