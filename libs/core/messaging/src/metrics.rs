//! Prometheus metrics for publishers, consumers and the connection manager.
//!
//! Recorded through the `metrics` facade; the worker binary installs the
//! Prometheus recorder. Without a recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const MESSAGES_PUBLISHED: &str = "messaging_messages_published_total";
pub const PUBLISH_FAILURES: &str = "messaging_publish_failures_total";
pub const MESSAGES_RECEIVED: &str = "messaging_messages_received_total";
pub const MESSAGES_ACKED: &str = "messaging_messages_acked_total";
pub const MESSAGES_REQUEUED: &str = "messaging_messages_requeued_total";
pub const MESSAGES_DEAD_LETTERED: &str = "messaging_messages_dead_lettered_total";
pub const PROCESSING_DURATION: &str = "messaging_processing_duration_seconds";
pub const RECONNECT_ATTEMPTS: &str = "messaging_reconnect_attempts_total";
pub const CONNECTION_UP: &str = "messaging_connection_up";

/// Metrics labelled by queue.
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    queue: String,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn published(&self) {
        counter!(MESSAGES_PUBLISHED, "queue" => self.queue.clone()).increment(1);
    }

    pub fn publish_failed(&self) {
        counter!(PUBLISH_FAILURES, "queue" => self.queue.clone()).increment(1);
    }

    pub fn received(&self) {
        counter!(MESSAGES_RECEIVED, "queue" => self.queue.clone()).increment(1);
    }

    /// Record a successful delivery and its processing time.
    pub fn acked(&self, duration: Duration) {
        counter!(MESSAGES_ACKED, "queue" => self.queue.clone()).increment(1);
        histogram!(
            PROCESSING_DURATION,
            "queue" => self.queue.clone(),
            "outcome" => "success"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed delivery put back on the queue.
    pub fn requeued(&self, category: &str, duration: Duration) {
        counter!(
            MESSAGES_REQUEUED,
            "queue" => self.queue.clone(),
            "category" => category.to_string()
        )
        .increment(1);
        histogram!(
            PROCESSING_DURATION,
            "queue" => self.queue.clone(),
            "outcome" => "failure"
        )
        .record(duration.as_secs_f64());
    }

    pub fn dead_lettered(&self, category: &str) {
        counter!(
            MESSAGES_DEAD_LETTERED,
            "queue" => self.queue.clone(),
            "category" => category.to_string()
        )
        .increment(1);
    }
}

/// Connection manager metrics.
pub fn reconnect_attempt(system: &'static str) {
    counter!(RECONNECT_ATTEMPTS, "system" => system).increment(1);
}

pub fn connection_up(system: &'static str, up: bool) {
    gauge!(CONNECTION_UP, "system" => system).set(if up { 1.0 } else { 0.0 });
}
