use crate::{ConfigError, FromEnv, env_optional, env_or_default, env_parse, env_parse_optional};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};

/// Which broker implementation a binary connects to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BrokerBackend {
    /// NATS JetStream server at `BROKER_URL`
    Nats,
    /// In-process broker, single process only
    Memory,
}

/// Broker and queue settings shared by the producer and the worker
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub service_name: String,
    pub backend: BrokerBackend,
    pub url: String,
    pub queue: String,
    pub reconnect_delay: Duration,
    pub prefetch: u16,
    /// Dead-letter after this many deliveries; `None` requeues forever
    pub max_deliveries: Option<u32>,
    pub dead_letter_queue: String,
}

impl BrokerConfig {
    pub const DEFAULT_QUEUE: &'static str = "order_events";

    pub fn dead_letter_enabled(&self) -> bool {
        self.max_deliveries.is_some()
    }
}

impl FromEnv for BrokerConfig {
    /// Reads:
    /// - SERVICE_NAME: defaults to "order-service"
    /// - BROKER_BACKEND: "nats" (default) or "memory"
    /// - BROKER_URL: defaults to "nats://localhost:4222"
    /// - ORDER_QUEUE: defaults to "order_events"
    /// - RECONNECT_DELAY_MS: defaults to 5000
    /// - CONSUMER_PREFETCH: defaults to 1
    /// - MAX_DELIVERIES: unset disables dead-lettering
    /// - DEAD_LETTER_QUEUE: defaults to "{queue}_dlq"
    fn from_env() -> Result<Self, ConfigError> {
        let queue = env_or_default("ORDER_QUEUE", Self::DEFAULT_QUEUE);
        let prefetch: u16 = env_parse("CONSUMER_PREFETCH", 1)?;
        if prefetch == 0 {
            return Err(ConfigError::ParseError {
                key: "CONSUMER_PREFETCH".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            service_name: env_or_default("SERVICE_NAME", "order-service"),
            backend: env_parse("BROKER_BACKEND", BrokerBackend::Nats)?,
            url: env_or_default("BROKER_URL", "nats://localhost:4222"),
            reconnect_delay: Duration::from_millis(env_parse("RECONNECT_DELAY_MS", 5000)?),
            prefetch,
            max_deliveries: env_parse_optional("MAX_DELIVERIES")?,
            dead_letter_queue: env_optional("DEAD_LETTER_QUEUE")
                .unwrap_or_else(|| format!("{queue}_dlq")),
            queue,
        })
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            service_name: "order-service".to_string(),
            backend: BrokerBackend::Nats,
            url: "nats://localhost:4222".to_string(),
            queue: Self::DEFAULT_QUEUE.to_string(),
            reconnect_delay: Duration::from_secs(5),
            prefetch: 1,
            max_deliveries: None,
            dead_letter_queue: format!("{}_dlq", Self::DEFAULT_QUEUE),
        }
    }
}
