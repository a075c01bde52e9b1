//! Simulated payment validation for consumed orders.

use crate::models::OrderEvent;
use async_trait::async_trait;
use messaging::{ProcessingError, Processor};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, KeyValue};
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

/// Error message for any rejected payment.
pub const PAYMENT_VALIDATION_FAILED: &str = "Payment validation failed";

/// Which orders fail payment validation.
#[derive(Debug, Clone, Default)]
pub struct PaymentRules {
    /// Orders above this total are rejected
    pub max_total: Option<f64>,

    /// Customers whose payments are always rejected
    pub blocked_customers: HashSet<String>,

    /// Simulated gateway latency
    pub latency: Duration,
}

impl PaymentRules {
    pub fn with_max_total(mut self, max_total: f64) -> Self {
        self.max_total = Some(max_total);
        self
    }

    pub fn block_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.blocked_customers.insert(customer_id.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reason `order` is rejected, if any.
    pub fn violation(&self, order: &OrderEvent) -> Option<&'static str> {
        if !order.total.is_finite() || order.total < 0.0 {
            return Some("invalid total");
        }
        if self.blocked_customers.contains(&order.customer_id) {
            return Some("customer blocked");
        }
        match self.max_total {
            Some(max) if order.total > max => Some("total over limit"),
            _ => None,
        }
    }
}

/// Validates the payment for each order.
///
/// Rejections are permanent: retrying the same order cannot succeed. Without a
/// dead-letter policy the consumer still requeues them.
#[derive(Debug, Clone, Default)]
pub struct OrderProcessor {
    rules: PaymentRules,
}

impl OrderProcessor {
    pub fn new(rules: PaymentRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &PaymentRules {
        &self.rules
    }
}

#[async_trait]
impl Processor<OrderEvent> for OrderProcessor {
    async fn process(&self, order: &OrderEvent, cx: &Context) -> Result<(), ProcessingError> {
        if !self.rules.latency.is_zero() {
            tokio::time::sleep(self.rules.latency).await;
        }

        let span = cx.span();
        if let Some(reason) = self.rules.violation(order) {
            span.add_event(
                "payment.rejected",
                vec![
                    KeyValue::new("order.id", order.order_id.clone()),
                    KeyValue::new("payment.rejection_reason", reason),
                ],
            );
            info!(order_id = %order.order_id, reason, "Payment rejected");
            return Err(ProcessingError::permanent(PAYMENT_VALIDATION_FAILED));
        }

        span.set_attribute(KeyValue::new("order.total", order.total));
        span.add_event(
            "payment.validated",
            vec![KeyValue::new("order.id", order.order_id.clone())],
        );
        info!(
            order_id = %order.order_id,
            customer_id = %order.customer_id,
            total = order.total,
            items = order.items.len(),
            "Order processed"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "order_processor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderItem;
    use messaging::testing::TestTracer;
    use messaging::{ErrorCategory, SpanGuard};
    use opentelemetry::trace::SpanKind;

    fn order(customer: &str, total: f64) -> OrderEvent {
        OrderEvent::new(customer, vec![OrderItem::new("sku-1", 1, total)]).with_order_id("o1")
    }

    #[tokio::test]
    async fn test_accepts_within_limits() {
        let processor = OrderProcessor::new(PaymentRules::default().with_max_total(100.0));
        processor.process(&order("c1", 10.0), &Context::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_over_limit_as_permanent() {
        let processor = OrderProcessor::new(PaymentRules::default().with_max_total(100.0));
        let err = processor
            .process(&order("c1", 150.0), &Context::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), PAYMENT_VALIDATION_FAILED);
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn test_rejects_blocked_customer() {
        let processor = OrderProcessor::new(PaymentRules::default().block_customer("fraudster"));
        assert!(processor.process(&order("fraudster", 1.0), &Context::new()).await.is_err());
        assert!(processor.process(&order("c1", 1.0), &Context::new()).await.is_ok());
    }

    #[test]
    fn test_invalid_total_is_a_violation() {
        let rules = PaymentRules::default();
        assert_eq!(rules.violation(&order("c1", 1.0).with_total(-1.0)), Some("invalid total"));
        assert_eq!(rules.violation(&order("c1", 1.0).with_total(f64::NAN)), Some("invalid total"));
        assert_eq!(rules.violation(&order("c1", 1.0)), None);
    }

    #[tokio::test]
    async fn test_records_outcome_on_the_enclosing_span() {
        let spans = TestTracer::new();
        let processor = OrderProcessor::new(PaymentRules::default().with_max_total(100.0));

        let guard = SpanGuard::start(&spans.tracer, "order_processor", SpanKind::Internal, vec![], &Context::new());
        let _ = processor.process(&order("c1", 500.0), guard.context()).await;
        guard.end();

        let span = &spans.spans_named("order_processor")[0];
        let event = span.events.iter().find(|e| e.name == "payment.rejected").unwrap();
        assert!(
            event
                .attributes
                .iter()
                .any(|kv| kv.value.to_string() == "total over limit")
        );
    }
}
