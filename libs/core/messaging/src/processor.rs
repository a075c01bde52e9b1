//! Processing callback invoked by the consumer loop.

use crate::error::ProcessingError;
use crate::event::Event;
use async_trait::async_trait;
use opentelemetry::Context;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Business logic applied to each consumed event.
///
/// The consumer loop invokes `process` at most once per delivery attempt, inside
/// an internal span whose context is passed as `cx`. Start child spans from
/// `cx` rather than from any ambient context.
///
/// # Error Handling
///
/// Any error nacks the delivery with requeue. With a dead-letter policy
/// configured, the category decides:
/// - `Transient`: requeued until the delivery limit is reached
/// - `Permanent`: moved to the dead-letter queue at once
///
/// No timeout is enforced; a callback that never completes stalls the consumer.
///
/// # Example
///
/// ```rust,ignore
/// #[async_trait]
/// impl Processor<OrderEvent> for OrderProcessor {
///     async fn process(&self, order: &OrderEvent, cx: &Context) -> Result<(), ProcessingError> {
///         if order.total <= 0.0 {
///             return Err(ProcessingError::permanent("Payment validation failed"));
///         }
///         self.payments.charge(order, cx).await
///             .map_err(|e| ProcessingError::transient_with_source("payment gateway", e))
///     }
///
///     fn name(&self) -> &'static str {
///         "order_processor"
///     }
/// }
/// ```
#[async_trait]
pub trait Processor<E: Event>: Send + Sync {
    /// Process one event.
    async fn process(&self, event: &E, cx: &Context) -> Result<(), ProcessingError>;

    /// Used for span names, logging and metrics labels.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<E: Event, P: Processor<E> + ?Sized> Processor<E> for Arc<P> {
    async fn process(&self, event: &E, cx: &Context) -> Result<(), ProcessingError> {
        (**self).process(event, cx).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// A no-op processor for testing.
#[derive(Debug, Clone, Default)]
pub struct NoOpProcessor;

#[async_trait]
impl<E: Event> Processor<E> for NoOpProcessor {
    async fn process(&self, _event: &E, _cx: &Context) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop_processor"
    }
}

/// A processor that fails (for testing).
///
/// Fails every call, or only the first `n` after [`times`](Self::times).
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    error_message: String,
    transient: bool,
    fail_times: Option<u32>,
    calls: Arc<AtomicU32>,
}

impl FailingProcessor {
    /// Create a processor that fails with transient errors.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            transient: true,
            fail_times: None,
            calls: Arc::default(),
        }
    }

    /// Create a processor that fails with permanent errors.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            ..Self::transient(message)
        }
    }

    /// Fail only the first `n` calls, then succeed.
    pub fn times(mut self, n: u32) -> Self {
        self.fail_times = Some(n);
        self
    }

    /// Number of `process` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: Event> Processor<E> for FailingProcessor {
    async fn process(&self, _event: &E, _cx: &Context) -> Result<(), ProcessingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_times.is_some_and(|n| call > n) {
            return Ok(());
        }

        if self.transient {
            Err(ProcessingError::transient(&self.error_message))
        } else {
            Err(ProcessingError::permanent(&self.error_message))
        }
    }

    fn name(&self) -> &'static str {
        "failing_processor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct TestEvent {
        id: String,
    }

    impl Event for TestEvent {
        fn event_id(&self) -> String {
            self.id.clone()
        }
    }

    fn event() -> TestEvent {
        TestEvent {
            id: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_noop_processor() {
        let processor = NoOpProcessor;
        let result = Processor::<TestEvent>::process(&processor, &event(), &Context::new()).await;
        assert!(result.is_ok());
        assert_eq!(Processor::<TestEvent>::name(&processor), "noop_processor");
    }

    #[tokio::test]
    async fn test_failing_processor_transient() {
        let processor = FailingProcessor::transient("test failure");
        let error = Processor::<TestEvent>::process(&processor, &event(), &Context::new())
            .await
            .unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Transient);
    }

    #[tokio::test]
    async fn test_failing_processor_permanent() {
        let processor = FailingProcessor::permanent("Payment validation failed");
        let error = Processor::<TestEvent>::process(&processor, &event(), &Context::new())
            .await
            .unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Permanent);
        assert_eq!(error.to_string(), "Payment validation failed");
    }

    #[tokio::test]
    async fn test_failing_processor_times() {
        let processor = FailingProcessor::transient("flaky").times(2);
        let cx = Context::new();

        assert!(Processor::<TestEvent>::process(&processor, &event(), &cx).await.is_err());
        assert!(Processor::<TestEvent>::process(&processor, &event(), &cx).await.is_err());
        assert!(Processor::<TestEvent>::process(&processor, &event(), &cx).await.is_ok());
        assert_eq!(processor.calls(), 3);
    }

    #[tokio::test]
    async fn test_arc_processor_delegates() {
        let processor = Arc::new(FailingProcessor::permanent("boom"));
        let shared = processor.clone();
        let _ = Processor::<TestEvent>::process(&shared, &event(), &Context::new()).await;
        assert_eq!(processor.calls(), 1);
        assert_eq!(Processor::<TestEvent>::name(&shared), "failing_processor");
    }
}
