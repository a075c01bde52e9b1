//! Pipeline behavior against a real JetStream server.
//!
//! Run with `cargo test -p nats-broker -- --ignored` (needs docker).

use messaging::span::attributes;
use messaging::testing::TestTracer;
use messaging::{
    ConnectionConfig, ConnectionManager, ConsumerConfig, ConsumerLoop, Event, FailingProcessor,
    MessagingError, NoOpProcessor, Processor, Publisher, PublisherConfig,
};
use nats_broker::{NatsBroker, NatsConfig, config};
use opentelemetry::trace::Status;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{TestDataBuilder, TestNats, wait_until};
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Order {
    order_id: String,
    customer_id: String,
    total: f64,
}

impl Event for Order {
    fn event_id(&self) -> String {
        self.order_id.clone()
    }

    fn event_type(&self) -> &'static str {
        "order.created"
    }
}

async fn connect(nats: &TestNats, queue: &str) -> ConnectionManager {
    connect_with(NatsConfig::new(nats.connection_string()), queue).await
}

async fn connect_with(config: NatsConfig, queue: &str) -> ConnectionManager {
    let broker = NatsBroker::new(config.with_connection_name("jetstream-test"));
    let connection = ConnectionManager::new(Arc::new(broker), ConnectionConfig::fixed(Duration::from_millis(200)));
    connection.register_queue(queue).await.unwrap();
    connection.ensure_connected();
    connection.wait_until_connected().await.unwrap();
    connection
}

async fn drained(nats: &TestNats, queue: &str) {
    let stream = config::stream_name(queue);
    let stream = stream.as_str();
    wait_until(Duration::from_secs(10), "stream drained", move || async move {
        nats.stream_depth(stream).await == 0
    })
    .await;
}

fn spawn<P: Processor<Order> + 'static>(
    connection: &ConnectionManager,
    tracer: &TestTracer,
    processor: P,
    queue: &str,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let consumer = ConsumerLoop::new(
        connection.clone(),
        tracer.tracer.clone(),
        processor,
        ConsumerConfig::new(queue),
    );
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        consumer.run(rx).await.unwrap();
    });
    (tx, handle)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn publish_consume_ack_over_jetstream() {
    let nats = TestNats::new().await;
    let data = TestDataBuilder::from_test_name("publish_consume_ack_over_jetstream");
    let queue = data.queue("order_events");
    let tracer = TestTracer::new();

    let connection = connect(&nats, &queue).await;
    assert_eq!(connection.system(), "nats");

    let publisher = Publisher::new(connection.clone(), tracer.tracer.clone(), PublisherConfig::new("order-service"));
    let order = Order {
        order_id: data.order_id(1),
        customer_id: data.customer_id(1),
        total: 42.0,
    };
    let receipt = publisher.publish(&order, &queue).await.unwrap();

    let (shutdown, handle) = spawn(&connection, &tracer, NoOpProcessor, &queue);

    let receive = format!("{queue} receive");
    let (spans, name) = (&tracer, receive.as_str());
    wait_until(Duration::from_secs(10), "consumer span", move || async move {
        !spans.spans_named(name).is_empty()
    })
    .await;
    drained(&nats, &queue).await;

    shutdown.send_replace(true);
    handle.await.unwrap();

    let consumer = tracer.spans_named(&receive);
    assert_eq!(consumer[0].status, Status::Ok);
    assert_eq!(consumer[0].span_context.trace_id(), receipt.trace_id);
    assert_eq!(
        tracer.attribute(&consumer[0], attributes::MESSAGING_SYSTEM).as_deref(),
        Some("nats")
    );
    connection.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn failed_callback_is_redelivered() {
    let nats = TestNats::new().await;
    let data = TestDataBuilder::from_test_name("failed_callback_is_redelivered");
    let queue = data.queue("order_events");
    let tracer = TestTracer::new();

    let connection = connect(&nats, &queue).await;
    let publisher = Publisher::new(connection.clone(), tracer.tracer.clone(), PublisherConfig::default());
    let processor = FailingProcessor::permanent("Payment validation failed").times(1);
    let (shutdown, handle) = spawn(&connection, &tracer, processor.clone(), &queue);

    let order = Order {
        order_id: data.order_id(1),
        customer_id: data.customer_id(1),
        total: 1500.0,
    };
    publisher.publish(&order, &queue).await.unwrap();

    let calls = &processor;
    wait_until(Duration::from_secs(10), "redelivery", move || async move { calls.calls() >= 2 }).await;
    drained(&nats, &queue).await;

    shutdown.send_replace(true);
    handle.await.unwrap();

    let spans = tracer.spans_named(&format!("{queue} receive"));
    assert!(spans.iter().any(|s| s.status == Status::error("Payment validation failed")));
    assert!(spans.iter().any(|s| s.status == Status::Ok));
    connection.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn assert_queue_is_idempotent() {
    let nats = TestNats::new().await;
    let queue = "idempotent_orders";

    let first = connect(&nats, queue).await;
    first.close().await;
    let second = connect(&nats, queue).await;

    let publisher = Publisher::new(second.clone(), TestTracer::new().tracer, PublisherConfig::default());
    publisher
        .publish(
            &Order {
                order_id: "o1".to_string(),
                customer_id: "c1".to_string(),
                total: 1.0,
            },
            queue,
        )
        .await
        .unwrap();

    assert_eq!(nats.stream_depth(&config::stream_name(queue)).await, 1);
    second.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn full_stream_refuses_publish() {
    let nats = TestNats::new().await;
    let queue = "bounded_orders";
    let connection = connect_with(NatsConfig::new(nats.connection_string()).with_max_messages(1), queue).await;
    let publisher = Publisher::new(connection.clone(), TestTracer::new().tracer, PublisherConfig::default());

    let order = |id: &str| Order {
        order_id: id.to_string(),
        customer_id: "c1".to_string(),
        total: 1.0,
    };
    publisher.publish(&order("o1"), queue).await.unwrap();
    let err = publisher.publish(&order("o2"), queue).await.unwrap_err();
    assert!(matches!(err, MessagingError::PublishFailed { .. }), "unexpected error: {err}");

    // The queued message survives the overflow.
    assert_eq!(nats.stream_depth(&config::stream_name(queue)).await, 1);
    connection.close().await;
}
