//! Transport message, header map and broker deliveries.

use crate::error::BrokerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{AsRefStr, Display, EnumString};

/// Standard application header keys.
///
/// Trace context keys (`traceparent`, `tracestate`) are written by the
/// propagator and are not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum HeaderKey {
    /// Name of the publishing service.
    Service,
    /// Operation that produced the message.
    Operation,
    /// Identifier of the carried event.
    EventId,
    /// Type name of the carried event.
    EventType,
    /// Body encoding.
    ContentType,
    /// Reason a message was dead-lettered.
    #[strum(serialize = "x-death-reason")]
    DeathReason,
    /// Queue a dead-lettered message came from.
    #[strum(serialize = "x-original-queue")]
    OriginalQueue,
    /// Delivery attempts before dead-lettering.
    #[strum(serialize = "x-delivery-count")]
    DeliveryCount,
}

/// A header value: string or number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Text(String),
    Number(i64),
}

impl HeaderValue {
    /// String view; numbers are not coerced.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            HeaderValue::Number(_) => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(s) => f.write_str(s),
            HeaderValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Number(value)
    }
}

impl From<u32> for HeaderValue {
    fn from(value: u32) -> Self {
        HeaderValue::Number(i64::from(value))
    }
}

/// Flat header map attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, HeaderValue>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    /// String value of a header, if present and textual.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(HeaderValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, HeaderValue)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, HeaderValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A message as handed to the broker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    headers: Headers,
    persistent: bool,
}

impl Message {
    /// A message that survives a broker restart.
    pub fn persistent(body: Vec<u8>, headers: Headers) -> Self {
        Self {
            body,
            headers,
            persistent: true,
        }
    }

    /// A message the broker may keep in memory only.
    pub fn transient(body: Vec<u8>, headers: Headers) -> Self {
        Self {
            body,
            headers,
            persistent: false,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn into_parts(self) -> (Vec<u8>, Headers, bool) {
        (self.body, self.headers, self.persistent)
    }
}

/// Backend hook that settles one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Remove the message from the queue.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Reject the message, optionally putting it back on the queue.
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message received from a queue, awaiting settlement.
///
/// `ack` and `nack` consume the delivery, so a delivery is settled at most once.
pub struct Delivery {
    message: Message,
    delivery_count: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, delivery_count: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            delivery_count: delivery_count.max(1),
            acker,
        }
    }

    pub fn body(&self) -> &[u8] {
        self.message.body()
    }

    pub fn headers(&self) -> &Headers {
        self.message.headers()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Delivery attempt number, starting at 1.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Acknowledge successful processing.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Negative-acknowledge; `requeue = true` makes the message available again.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}
