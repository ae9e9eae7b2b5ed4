//! Stream subscription descriptors.
//!
//! A [`StreamSub`] names a stream and, optionally, the consumer group and
//! consumer it is read through. It is validated once, when built.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BusError;

/// Last-seen id meaning "only messages arriving from now on".
pub const LAST_ID_LATEST: &str = "$";

/// Default interval between stream polls.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(100);

/// Unvalidated subscription settings, e.g. loaded from a config file.
///
/// ```
/// use sourced_bus::subscription::{StreamSub, StreamSubConfig};
///
/// let config: StreamSubConfig = serde_json::from_str(r#"{
///     "stream": "orders",
///     "group": "billing",
///     "consumer": "billing-1"
/// }"#).unwrap();
///
/// let sub = StreamSub::try_from(config).unwrap();
/// assert_eq!(sub.last_id(), "$");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSubConfig {
    pub stream: String,
    pub group: Option<String>,
    pub consumer: Option<String>,
    pub polling_interval_ms: Option<u64>,
    /// Read messages in batches instead of one at a time.
    pub batch: bool,
    pub no_ack: bool,
    /// Last-seen id to start reading after. Defaults to [`LAST_ID_LATEST`].
    pub last_id: Option<String>,
    /// Approximate stream length cap applied on publish.
    pub maxlen: Option<u64>,
    /// Messages fetched per read.
    pub max_records: Option<u64>,
    /// Messages processed concurrently.
    pub max_concurrent: Option<usize>,
}

impl Default for StreamSubConfig {
    fn default() -> Self {
        Self {
            stream: String::new(),
            group: None,
            consumer: None,
            polling_interval_ms: Some(DEFAULT_POLLING_INTERVAL.as_millis() as u64),
            batch: false,
            no_ack: false,
            last_id: None,
            maxlen: None,
            max_records: None,
            max_concurrent: None,
        }
    }
}

impl StreamSubConfig {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            ..Self::default()
        }
    }

    /// Read through a consumer group. Both names are required together.
    pub fn group(mut self, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self.consumer = Some(consumer.into());
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    pub fn no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }

    pub fn last_id(mut self, last_id: impl Into<String>) -> Self {
        self.last_id = Some(last_id.into());
        self
    }

    pub fn maxlen(mut self, maxlen: u64) -> Self {
        self.maxlen = Some(maxlen);
        self
    }

    pub fn max_records(mut self, max_records: u64) -> Self {
        self.max_records = Some(max_records);
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    /// Validate into a [`StreamSub`].
    pub fn build(self) -> Result<StreamSub, BusError> {
        StreamSub::try_from(self)
    }
}

/// A validated stream subscription.
///
/// Group and consumer are either both set or both unset. Equality and hash
/// only look at the stream, group, and consumer names.
#[derive(Clone, Debug)]
pub struct StreamSub {
    name: String,
    group: Option<String>,
    consumer: Option<String>,
    polling_interval: Option<Duration>,
    batch: bool,
    no_ack: bool,
    last_id: String,
    maxlen: Option<u64>,
    max_records: Option<u64>,
    max_concurrent: Option<usize>,
}

impl StreamSub {
    /// Subscribe to `stream` without a consumer group.
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            name: stream.into(),
            group: None,
            consumer: None,
            polling_interval: Some(DEFAULT_POLLING_INTERVAL),
            batch: false,
            no_ack: false,
            last_id: LAST_ID_LATEST.to_string(),
            maxlen: None,
            max_records: None,
            max_concurrent: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn consumer(&self) -> Option<&str> {
        self.consumer.as_deref()
    }

    pub fn polling_interval(&self) -> Option<Duration> {
        self.polling_interval
    }

    pub fn batch(&self) -> bool {
        self.batch
    }

    pub fn no_ack(&self) -> bool {
        self.no_ack
    }

    pub fn last_id(&self) -> &str {
        &self.last_id
    }

    pub fn maxlen(&self) -> Option<u64> {
        self.maxlen
    }

    pub fn max_records(&self) -> Option<u64> {
        self.max_records
    }

    pub fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent
    }
}

impl TryFrom<StreamSubConfig> for StreamSub {
    type Error = BusError;

    fn try_from(config: StreamSubConfig) -> Result<Self, Self::Error> {
        let group = config.group.filter(|g| !g.is_empty());
        let consumer = config.consumer.filter(|c| !c.is_empty());

        match (&group, &consumer) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(BusError::configuration(
                    "`group` and `consumer` must be given together",
                ));
            }
            (Some(group), Some(_)) if config.no_ack => {
                warn!(
                    stream = %config.stream,
                    %group,
                    "`no_ack` has no effect with a consumer group"
                );
            }
            _ => {}
        }

        Ok(StreamSub {
            name: config.stream,
            group,
            consumer,
            polling_interval: config.polling_interval_ms.map(Duration::from_millis),
            batch: config.batch,
            no_ack: config.no_ack,
            last_id: config
                .last_id
                .unwrap_or_else(|| LAST_ID_LATEST.to_string()),
            maxlen: config.maxlen,
            max_records: config.max_records,
            max_concurrent: config.max_concurrent,
        })
    }
}

impl PartialEq for StreamSub {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.group == other.group && self.consumer == other.consumer
    }
}

impl Eq for StreamSub {}

impl Hash for StreamSub {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.group.hash(state);
        self.consumer.hash(state);
    }
}
