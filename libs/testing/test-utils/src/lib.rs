//! Shared test utilities for the messaging crates
//!
//! - `TestNats`: NATS container with JetStream and automatic cleanup (feature: "nats")
//! - `TestDataBuilder`: Deterministic order identifiers (always available)
//! - `wait_until`: Poll a condition with a deadline (always available)
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["nats"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::TestNats;
//!
//! #[tokio::test]
//! #[ignore = "requires docker"]
//! async fn my_nats_test() {
//!     let nats = TestNats::new().await;
//!     let broker = NatsBroker::new(NatsConfig::new(nats.connection_string()));
//! }
//! ```

use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

#[cfg(feature = "nats")]
mod nats;

#[cfg(feature = "nats")]
pub use nats::TestNats;

/// Builder for test data with deterministic identifiers
///
/// Tests seeded from the same name produce the same orders, so failures
/// reproduce across runs.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_publish_order");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic UUID derived from the seed and `index`
    pub fn uuid(&self, index: u64) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.seed.to_le_bytes());
        bytes[8..].copy_from_slice(&index.to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    pub fn order_id(&self, index: u64) -> String {
        format!("order-{}", self.uuid(index))
    }

    pub fn customer_id(&self, index: u64) -> String {
        format!("customer-{}-{index}", self.seed)
    }

    /// Queue name unique to this builder, so tests sharing a broker don't collide
    pub fn queue(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.seed)
    }
}

/// Poll `condition` every 10ms until it returns true.
///
/// Panics with `context` when `timeout` elapses first.
pub async fn wait_until<F, Fut>(timeout: Duration, context: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("{context}: condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.order_id(1), builder2.order_id(1));
        assert_ne!(builder1.order_id(1), builder1.order_id(2));
        assert_eq!(builder1.queue("orders"), "orders_42");
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.uuid(0), builder2.uuid(0));
    }

    #[tokio::test]
    async fn test_wait_until_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        wait_until(Duration::from_secs(1), "counter", move || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[should_panic(expected = "never")]
    async fn test_wait_until_times_out() {
        wait_until(Duration::from_millis(30), "never", || async { false }).await;
    }
}
