//! Configuration types for connections, publishers and consumers.

use crate::error::ErrorCategory;
use std::time::Duration;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default number of unacknowledged deliveries per consumer.
pub const DEFAULT_PREFETCH: u16 = 1;

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay schedule between failed or closed connections
    pub reconnect: BackoffStrategy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: BackoffStrategy::Fixed(DEFAULT_RECONNECT_DELAY),
        }
    }
}

impl ConnectionConfig {
    /// Fixed delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            reconnect: BackoffStrategy::Fixed(delay),
        }
    }

    pub fn with_reconnect(mut self, strategy: BackoffStrategy) -> Self {
        self.reconnect = strategy;
        self
    }
}

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Value of the `service` header
    pub service: String,

    /// Value of the `content-type` header
    pub content_type: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            service: "messaging".to_string(),
            content_type: "application/json".to_string(),
        }
    }
}

impl PublisherConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }
}

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Queue to consume
    pub queue: String,

    /// Unacknowledged deliveries the broker may push to this consumer
    pub prefetch: u16,

    /// Poison message handling; `None` requeues failures forever
    pub dead_letter: Option<DeadLetterPolicy>,
}

impl ConsumerConfig {
    /// Consume `queue` with prefetch 1 and unlimited requeue.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            prefetch: DEFAULT_PREFETCH,
            dead_letter: None,
        }
    }

    /// Create from queue definition constants.
    ///
    /// # Example
    ///
    /// ```rust
    /// use messaging::{ConsumerConfig, QueueDef};
    ///
    /// struct Orders;
    ///
    /// impl QueueDef for Orders {
    ///     const QUEUE_NAME: &'static str = "order_events";
    ///     const DLQ_NAME: &'static str = "order_events_dlq";
    ///     const MAX_DELIVERIES: Option<u32> = Some(5);
    /// }
    ///
    /// let config = ConsumerConfig::from_def::<Orders>();
    /// assert_eq!(config.prefetch, 1);
    /// assert_eq!(config.dead_letter.unwrap().queue, "order_events_dlq");
    /// ```
    pub fn from_def<D: QueueDef>() -> Self {
        Self {
            queue: D::QUEUE_NAME.to_string(),
            prefetch: D::PREFETCH,
            dead_letter: D::MAX_DELIVERIES.map(|max| DeadLetterPolicy::new(max, D::DLQ_NAME)),
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_dead_letter(mut self, policy: DeadLetterPolicy) -> Self {
        self.dead_letter = Some(policy);
        self
    }
}

/// Queue definition trait (for type-safe constants).
pub trait QueueDef {
    /// Queue name
    const QUEUE_NAME: &'static str;

    /// Dead letter queue name
    const DLQ_NAME: &'static str;

    /// Prefetch (default: 1)
    const PREFETCH: u16 = DEFAULT_PREFETCH;

    /// Dead-letter threshold (default: unlimited requeue)
    const MAX_DELIVERIES: Option<u32> = None;
}

/// When to move a failing delivery to a dead-letter queue instead of requeueing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    /// Delivery attempts after which a failing message is dead-lettered
    pub max_deliveries: u32,

    /// Destination queue
    pub queue: String,
}

impl DeadLetterPolicy {
    pub fn new(max_deliveries: u32, queue: impl Into<String>) -> Self {
        Self {
            max_deliveries: max_deliveries.max(1),
            queue: queue.into(),
        }
    }

    /// Policy using the conventional `{queue}_dlq` destination.
    pub fn for_queue(queue: &str, max_deliveries: u32) -> Self {
        Self::new(max_deliveries, dead_letter_queue_name(queue))
    }

    /// Permanent failures go straight to the dead-letter queue; transient ones
    /// once the delivery count reaches the threshold.
    pub fn should_dead_letter(&self, delivery_count: u32, category: ErrorCategory) -> bool {
        !category.is_retryable() || delivery_count >= self.max_deliveries
    }
}

/// Conventional dead-letter queue name for `queue`.
pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}_dlq")
}

/// Backoff strategy between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    Fixed(Duration),

    /// Exponential backoff (base * 2^attempt, capped at max)
    Exponential { base: Duration, max: Duration },

    /// Linear backoff (base * (attempt + 1), capped at max)
    Linear { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Delay before the attempt following `attempt` consecutive failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(d) => *d,
            BackoffStrategy::Exponential { base, max } => {
                let delay = base.saturating_mul(2u32.saturating_pow(attempt));
                delay.min(*max)
            }
            BackoffStrategy::Linear { base, max } => {
                let delay = base.saturating_mul(attempt.saturating_add(1));
                delay.min(*max)
            }
        }
    }
}
