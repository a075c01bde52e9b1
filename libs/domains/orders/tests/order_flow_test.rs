//! Orders flowing from publisher to the payment processor over the in-memory broker.
//!
//! These tests cover:
//! - The JSON wire shape of a published order
//! - Producer, consumer and processor spans sharing one trace
//! - Rejected payments being requeued, or dead-lettered under a policy

use domain_orders::{OrderEvent, OrderItem, OrderProcessor, OrderQueue, PAYMENT_VALIDATION_FAILED, PaymentRules};
use messaging::testing::TestTracer;
use messaging::{
    ConnectionConfig, ConnectionManager, ConsumerConfig, ConsumerLoop, DeadLetterPolicy, InMemoryBroker,
    MessagingError, Publisher, PublisherConfig, QueueDef, QueueStats,
};
use opentelemetry::trace::Status;
use std::sync::Arc;
use std::time::Duration;
use test_utils::wait_until;
use tokio::sync::watch;

async fn connected(broker: &InMemoryBroker) -> ConnectionManager {
    let connection = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::default());
    connection.register_queue(OrderQueue::QUEUE_NAME).await.unwrap();
    connection.ensure_connected();
    connection.wait_until_connected().await.unwrap();
    connection
}

fn spawn_worker(
    connection: &ConnectionManager,
    spans: &TestTracer,
    rules: PaymentRules,
    config: ConsumerConfig,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<Result<(), MessagingError>>) {
    let consumer = ConsumerLoop::new(
        connection.clone(),
        spans.tracer.clone(),
        OrderProcessor::new(rules),
        config,
    );
    let (tx, rx) = watch::channel(false);
    (tx, tokio::spawn(async move { consumer.run(rx).await }))
}

async fn wait_for(broker: &InMemoryBroker, queue: &str, done: impl Fn(&QueueStats) -> bool) -> QueueStats {
    let done = &done;
    wait_until(Duration::from_secs(3), queue, move || async move { done(&broker.stats(queue).await) }).await;
    broker.stats(queue).await
}

fn order(customer: &str, order_id: &str, total: f64) -> OrderEvent {
    OrderEvent::new(customer, vec![OrderItem::new("sku-1", 1, total)]).with_order_id(order_id)
}

#[tokio::test]
async fn test_published_order_wire_shape() {
    let broker = InMemoryBroker::new();
    let connection = connected(&broker).await;
    let spans = TestTracer::new();
    let publisher = Publisher::new(connection.clone(), spans.tracer.clone(), PublisherConfig::default());

    publisher
        .publish(&order("c1", "o1", 10.0), OrderQueue::QUEUE_NAME)
        .await
        .unwrap();

    let published = broker.published(OrderQueue::QUEUE_NAME).await;
    assert_eq!(published.len(), 1);
    assert!(published[0].is_persistent());
    assert!(published[0].headers().contains_key("traceparent"));

    let body: serde_json::Value = serde_json::from_slice(published[0].body()).unwrap();
    assert_eq!(body["orderId"], "o1");
    assert_eq!(body["customerId"], "c1");
    assert_eq!(body["total"], 10.0);
    assert!(body["timestamp"].is_string());

    connection.close().await;
}

#[tokio::test]
async fn test_valid_order_is_acked_in_one_trace() {
    let broker = InMemoryBroker::new();
    let connection = connected(&broker).await;
    let spans = TestTracer::new();
    let (shutdown, worker) = spawn_worker(
        &connection,
        &spans,
        PaymentRules::default().with_max_total(100.0),
        ConsumerConfig::from_def::<OrderQueue>(),
    );

    let publisher = Publisher::new(connection.clone(), spans.tracer.clone(), PublisherConfig::default());
    let receipt = publisher
        .publish(&order("c1", "o1", 10.0), OrderQueue::QUEUE_NAME)
        .await
        .unwrap();

    let stats = wait_for(&broker, OrderQueue::QUEUE_NAME, |s| s.acked == 1).await;
    shutdown.send_replace(true);
    worker.await.unwrap().unwrap();
    assert_eq!(stats.requeued, 0);

    let receive = spans.spans_named("order_events receive");
    let processing = spans.spans_named("order_processor");
    assert_eq!(receive.len(), 1);
    assert_eq!(processing.len(), 1);
    assert_eq!(receive[0].span_context.trace_id(), receipt.trace_id);
    assert_eq!(processing[0].parent_span_id, receive[0].span_context.span_id());
    assert!(processing[0].events.iter().any(|event| event.name == "payment.validated"));

    connection.close().await;
}

#[tokio::test]
async fn test_rejected_order_is_requeued_without_policy() {
    let broker = InMemoryBroker::new();
    let connection = connected(&broker).await;
    let spans = TestTracer::new();
    let (shutdown, worker) = spawn_worker(
        &connection,
        &spans,
        PaymentRules::default().block_customer("c7"),
        ConsumerConfig::from_def::<OrderQueue>(),
    );

    let publisher = Publisher::new(connection.clone(), spans.tracer.clone(), PublisherConfig::default());
    publisher
        .publish(&order("c7", "o7", 10.0), OrderQueue::QUEUE_NAME)
        .await
        .unwrap();

    let stats = wait_for(&broker, OrderQueue::QUEUE_NAME, |s| s.requeued >= 2).await;
    shutdown.send_replace(true);
    worker.await.unwrap().unwrap();
    assert_eq!(stats.acked, 0);

    // A delivery in flight at shutdown ends its span without a status.
    let settled: Vec<_> = spans
        .spans_named("order_events receive")
        .into_iter()
        .filter(|span| span.status != Status::Unset)
        .collect();
    assert!(!settled.is_empty());
    for span in &settled {
        assert_eq!(span.status, Status::error(PAYMENT_VALIDATION_FAILED));
    }
    assert_eq!(broker.stats(OrderQueue::DLQ_NAME).await.depth, 0);

    connection.close().await;
}

#[tokio::test]
async fn test_rejected_order_is_dead_lettered_under_policy() {
    let broker = InMemoryBroker::new();
    let connection = connected(&broker).await;
    let spans = TestTracer::new();
    let config = ConsumerConfig::from_def::<OrderQueue>()
        .with_dead_letter(DeadLetterPolicy::new(3, OrderQueue::DLQ_NAME));
    let (shutdown, worker) = spawn_worker(
        &connection,
        &spans,
        PaymentRules::default().with_max_total(50.0),
        config,
    );

    let publisher = Publisher::new(connection.clone(), spans.tracer.clone(), PublisherConfig::default());
    publisher
        .publish(&order("c1", "ok", 10.0), OrderQueue::QUEUE_NAME)
        .await
        .unwrap();
    publisher
        .publish(&order("c1", "too-big", 500.0), OrderQueue::QUEUE_NAME)
        .await
        .unwrap();

    wait_for(&broker, OrderQueue::DLQ_NAME, |s| s.depth == 1).await;
    let stats = wait_for(&broker, OrderQueue::QUEUE_NAME, |s| s.depth == 0 && s.unacked == 0).await;
    shutdown.send_replace(true);
    worker.await.unwrap().unwrap();

    // Permanent rejections skip the retry budget.
    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.acked, 2);

    let parked = broker.published(OrderQueue::DLQ_NAME).await;
    let body: serde_json::Value = serde_json::from_slice(parked[0].body()).unwrap();
    assert_eq!(body["orderId"], "too-big");

    connection.close().await;
}
