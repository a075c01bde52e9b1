//! NATS broker configuration.

use async_nats::jetstream::stream::{self, DiscardPolicy, RetentionPolicy, StorageType};
use std::time::Duration;

/// Connection and stream settings for [`NatsBroker`](crate::NatsBroker).
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Client name reported to the server
    pub connection_name: String,

    /// Give up on a connect attempt after this long
    pub connect_timeout: Duration,

    /// Redelivery timeout for unacknowledged messages
    pub ack_wait: Duration,

    /// Maximum messages held per queue stream; publishes beyond it are refused
    pub max_messages: i64,

    /// Maximum age of a queued message, zero for no expiry
    pub max_age: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connection_name: "messaging".to_string(),
            connect_timeout: Duration::from_secs(5),
            ack_wait: Duration::from_secs(30),
            max_messages: 100_000,
            max_age: Duration::ZERO,
        }
    }
}

impl NatsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_messages(mut self, max_messages: i64) -> Self {
        self.max_messages = max_messages;
        self
    }
}

/// Durable work-queue stream for `queue`.
///
/// A full stream refuses new publishes instead of discarding queued messages,
/// so overflow reaches the publisher as an error.
pub fn queue_stream(queue: &str, config: &NatsConfig) -> stream::Config {
    stream::Config {
        name: stream_name(queue),
        subjects: vec![subject(queue)],
        storage: StorageType::File,
        retention: RetentionPolicy::WorkQueue,
        discard: DiscardPolicy::New,
        max_messages: config.max_messages,
        max_age: config.max_age,
        ..Default::default()
    }
}

/// JetStream stream backing `queue`.
///
/// Stream names may not contain `.`, `*`, `>` or whitespace.
pub fn stream_name(queue: &str) -> String {
    queue
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Subject messages for `queue` are published on.
pub fn subject(queue: &str) -> String {
    format!("queue.{queue}")
}

/// Durable pull consumer name for `queue`.
pub fn durable_name(queue: &str) -> String {
    format!("{}_WORKERS", stream_name(queue))
}
