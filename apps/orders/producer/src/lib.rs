//! Order Producer
//!
//! Publishes order events to the `order_events` queue. Every publish opens a
//! producer span whose trace context travels in the message headers.
//!
//! ## Commands
//!
//! - `publish`: send orders to the configured broker (NATS by default)
//! - `demo`: run a producer and an order worker in one process over the
//!   in-process broker, with payment failures above a threshold
//!
//! Configuration comes from the environment (`BROKER_URL`, `ORDER_QUEUE`,
//! `SERVICE_NAME`, `OTEL_EXPORTER_OTLP_ENDPOINT`, ...).

use clap::{Parser, Subcommand};
use core_config::{BrokerConfig, Environment, FromEnv};
use domain_orders::{OrderEvent, OrderItem, OrderProcessor, PaymentRules};
use eyre::{Result, WrapErr, eyre};
use messaging::{
    ConnectionConfig, ConnectionManager, ConsumerConfig, ConsumerLoop, DeadLetterPolicy, InMemoryBroker, Publisher,
    PublisherConfig,
};
use observability::{Telemetry, TelemetryConfig, init_observability};
use opentelemetry_sdk::trace::SdkTracer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "order-producer")]
#[command(about = "Publish traced order events")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish orders to the configured broker
    Publish {
        /// Number of orders to publish
        #[arg(short, long, default_value_t = 1)]
        count: u32,

        /// Customer placing the orders
        #[arg(long, default_value = "c1")]
        customer: String,

        /// Unit price of the single item on each order
        #[arg(long, default_value_t = 10.0)]
        price: f64,

        /// Pause between publishes
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Give up if the broker is not reachable within this many seconds
        #[arg(long, default_value_t = 30)]
        connect_timeout: u64,
    },

    /// Publish and consume in one process over the in-process broker
    Demo {
        /// Number of orders to publish
        #[arg(short, long, default_value_t = 5)]
        count: u32,

        /// Orders with a total above this fail payment validation
        #[arg(long, default_value_t = 100.0)]
        fail_over: f64,

        /// Dead-letter a failing order after this many deliveries
        #[arg(long, default_value_t = 3)]
        max_deliveries: u32,
    },
}

/// Summary of a publish run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: u32,
    pub failed: u32,
}

/// Order `index` of a batch: `index + 1` units at `price`.
pub fn sample_order(customer: &str, index: u32, price: f64) -> OrderEvent {
    OrderEvent::new(customer, vec![OrderItem::new(format!("sku-{index:04}"), index + 1, price)])
}

pub async fn run(cli: Cli) -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    let telemetry_config = TelemetryConfig::from_env().wrap_err("Invalid telemetry configuration")?;
    let telemetry =
        init_observability(&environment, &telemetry_config).wrap_err("Failed to initialize telemetry")?;

    info!(service = %telemetry_config.service_name, command = ?cli.command, "Starting order producer");

    let result = match cli.command {
        Commands::Publish {
            count,
            customer,
            price,
            interval_ms,
            connect_timeout,
        } => {
            let config = BrokerConfig::from_env().wrap_err("Invalid broker configuration")?;
            publish(
                &config,
                &telemetry,
                &customer,
                price,
                count,
                Duration::from_millis(interval_ms),
                Duration::from_secs(connect_timeout),
            )
            .await
            .map(|summary| {
                info!(published = summary.published, failed = summary.failed, "Publish run complete");
            })
        }
        Commands::Demo {
            count,
            fail_over,
            max_deliveries,
        } => demo(&telemetry, count, fail_over, max_deliveries).await,
    };

    telemetry.shutdown();
    result
}

async fn publish(
    config: &BrokerConfig,
    telemetry: &Telemetry,
    customer: &str,
    price: f64,
    count: u32,
    interval: Duration,
    connect_timeout: Duration,
) -> Result<PublishSummary> {
    let connection = nats_broker::connect_from_config(config, &[config.queue.as_str()])
        .await
        .wrap_err("Failed to register order queue")?;

    let connected = tokio::time::timeout(connect_timeout, connection.wait_until_connected()).await;
    match connected {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e).wrap_err("Broker connection closed"),
        Err(_) => {
            connection.close().await;
            return Err(eyre!("Broker at {} not reachable within {:?}", config.url, connect_timeout));
        }
    }

    let publisher = Publisher::new(
        connection.clone(),
        telemetry.tracer(),
        PublisherConfig::new(config.service_name.clone()),
    );
    let summary = publish_orders(&publisher, &config.queue, customer, price, count, interval).await;

    connection.close().await;
    if summary.published == 0 && summary.failed > 0 {
        return Err(eyre!("All {} publishes failed", summary.failed));
    }
    Ok(summary)
}

/// Publish `count` sample orders, logging each receipt. Failures are counted,
/// not retried.
pub async fn publish_orders(
    publisher: &Publisher,
    queue: &str,
    customer: &str,
    price: f64,
    count: u32,
    interval: Duration,
) -> PublishSummary {
    let mut summary = PublishSummary::default();
    for index in 0..count {
        let order = sample_order(customer, index, price);
        match publisher.publish(&order, queue).await {
            Ok(receipt) => {
                summary.published += 1;
                info!(
                    order_id = %receipt.event_id,
                    trace_id = %receipt.trace_id,
                    total = order.total,
                    "Order published"
                );
            }
            Err(e) => {
                summary.failed += 1;
                error!(order_id = %order.order_id, error = %e, "Failed to publish order");
            }
        }
        if !interval.is_zero() && index + 1 < count {
            tokio::time::sleep(interval).await;
        }
    }
    summary
}

async fn demo(telemetry: &Telemetry, count: u32, fail_over: f64, max_deliveries: u32) -> Result<()> {
    let config = BrokerConfig::default();
    let broker = InMemoryBroker::new();
    let connection = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::fixed(config.reconnect_delay));
    connection.register_queue(config.queue.as_str()).await?;
    connection.ensure_connected();
    connection.wait_until_connected().await?;

    let tracer = telemetry.tracer();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = spawn_demo_worker(&connection, tracer.clone(), &config.queue, fail_over, max_deliveries, shutdown_rx);

    let publisher = Publisher::new(connection.clone(), tracer, PublisherConfig::new(config.service_name.clone()));
    // Totals step by fail_over / 2, so every order from the third on fails payment.
    let price = fail_over / 2.0;
    let summary = publish_orders(&publisher, &config.queue, "c1", price, count, Duration::ZERO).await;
    info!(published = summary.published, "Demo orders published, waiting for the worker");

    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let stats = broker.stats(&config.queue).await;
            if stats.depth == 0 && stats.unacked == 0 {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    let _ = shutdown_tx.send(true);
    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Demo worker stopped with an error"),
        Err(e) => warn!(error = %e, "Demo worker panicked"),
    }

    let stats = drained.map_err(|_| eyre!("Demo queue did not drain within 30s"))?;
    let dead_lettered = broker.stats(&format!("{}_dlq", config.queue)).await.depth;
    info!(
        acked = stats.acked,
        requeued = stats.requeued,
        dead_lettered,
        "Demo complete"
    );
    connection.close().await;
    Ok(())
}

fn spawn_demo_worker(
    connection: &ConnectionManager,
    tracer: SdkTracer,
    queue: &str,
    fail_over: f64,
    max_deliveries: u32,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<Result<(), messaging::MessagingError>> {
    let processor = OrderProcessor::new(PaymentRules::default().with_max_total(fail_over));
    let consumer_config =
        ConsumerConfig::new(queue).with_dead_letter(DeadLetterPolicy::for_queue(queue, max_deliveries));
    let consumer = ConsumerLoop::new(connection.clone(), tracer, processor, consumer_config);
    tokio::spawn(async move { consumer.run(shutdown).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::testing::TestTracer;

    #[test]
    fn test_cli_parses_publish() {
        let cli = Cli::parse_from(["order-producer", "publish", "--count", "3", "--price", "250"]);
        match cli.command {
            Commands::Publish { count, price, customer, .. } => {
                assert_eq!(count, 3);
                assert_eq!(price, 250.0);
                assert_eq!(customer, "c1");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_sample_order_totals() {
        let order = sample_order("c9", 2, 5.0);
        assert_eq!(order.customer_id, "c9");
        assert_eq!(order.items[0].quantity, 3);
        assert_eq!(order.total, 15.0);
    }

    #[tokio::test]
    async fn test_publish_orders_counts_failures() {
        let broker = InMemoryBroker::new();
        let connection = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::default());
        connection.register_queue("order_events").await.unwrap();
        connection.ensure_connected();
        connection.wait_until_connected().await.unwrap();

        let spans = TestTracer::new();
        let publisher = Publisher::new(connection.clone(), spans.tracer.clone(), PublisherConfig::default());

        let summary = publish_orders(&publisher, "order_events", "c1", 1.0, 2, Duration::ZERO).await;
        assert_eq!(summary, PublishSummary { published: 2, failed: 0 });

        broker.fail_publishes(true);
        let summary = publish_orders(&publisher, "order_events", "c1", 1.0, 2, Duration::ZERO).await;
        assert_eq!(summary, PublishSummary { published: 0, failed: 2 });

        assert_eq!(broker.stats("order_events").await.depth, 2);
        assert_eq!(spans.spans_named("order_events publish").len(), 4);
        connection.close().await;
    }
}
