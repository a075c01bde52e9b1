//! Order Worker
//!
//! Consumes `order_events` one delivery at a time, validating each payment
//! inside a consumer span that continues the producer's trace.
//!
//! ## Architecture
//!
//! ```text
//! Broker (order_events)
//!   ↓ (prefetch 1, manual ack)
//! ConsumerLoop<OrderEvent, OrderProcessor>
//!   ↓ ok → ack    error → nack(requeue) or dead-letter
//! OrderProcessor (simulated payment validation)
//! ```
//!
//! ## Endpoints
//!
//! `/metrics` (Prometheus), `/health` (liveness) and `/ready` (broker
//! connected) on `METRICS_PORT`.

use core_config::{
    BrokerConfig, ConfigError, Environment, FromEnv, MetricsServerConfig, env_optional, env_parse,
    env_parse_optional,
};
use domain_orders::{OrderEvent, OrderProcessor, PaymentRules};
use eyre::{Result, WrapErr};
use messaging::{ConnectionManager, ConsumerConfig, ConsumerLoop, DeadLetterPolicy, MessagingError, Processor};
use observability::{TelemetryConfig, init_metrics, init_observability, metrics_router};
use opentelemetry_sdk::trace::SdkTracer;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Consumer settings derived from the broker configuration.
pub fn consumer_config(config: &BrokerConfig) -> ConsumerConfig {
    let consumer = ConsumerConfig::new(config.queue.clone()).with_prefetch(config.prefetch);
    match config.max_deliveries {
        Some(max) => consumer.with_dead_letter(DeadLetterPolicy::new(max, config.dead_letter_queue.clone())),
        None => consumer,
    }
}

/// Payment rules from the environment:
/// - PAYMENT_MAX_TOTAL: reject orders above this total (unset = no limit)
/// - PAYMENT_BLOCKED_CUSTOMERS: comma-separated customer ids to reject
/// - PAYMENT_LATENCY_MS: simulated gateway latency, defaults to 0
pub fn payment_rules_from_env() -> Result<PaymentRules, ConfigError> {
    let mut rules = PaymentRules::default().with_latency(Duration::from_millis(env_parse("PAYMENT_LATENCY_MS", 0)?));
    if let Some(max_total) = env_parse_optional::<f64>("PAYMENT_MAX_TOTAL")? {
        rules = rules.with_max_total(max_total);
    }
    if let Some(blocked) = env_optional("PAYMENT_BLOCKED_CUSTOMERS") {
        for customer in blocked.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            rules = rules.block_customer(customer);
        }
    }
    Ok(rules)
}

/// Run the consumer loop until `shutdown` flips to true.
pub async fn run_consumer<P>(
    connection: ConnectionManager,
    tracer: SdkTracer,
    processor: P,
    config: ConsumerConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), MessagingError>
where
    P: Processor<OrderEvent> + 'static,
{
    info!(
        queue = %config.queue,
        prefetch = config.prefetch,
        dead_letter = ?config.dead_letter.as_ref().map(|p| &p.queue),
        "Starting order consumer"
    );
    ConsumerLoop::new(connection, tracer, processor, config).run(shutdown).await
}

/// Run the order worker
///
/// 1. Sets up logging, OTLP export and the Prometheus recorder
/// 2. Connects to the broker in the background (fixed-delay reconnect)
/// 3. Serves `/metrics`, `/health` and `/ready`
/// 4. Consumes until SIGINT or SIGTERM, leaving any in-flight delivery for redelivery
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    let telemetry_config = TelemetryConfig::from_env().wrap_err("Invalid telemetry configuration")?;
    let telemetry =
        init_observability(&environment, &telemetry_config).wrap_err("Failed to initialize telemetry")?;
    init_metrics().wrap_err("Failed to initialize metrics")?;

    let broker_config = BrokerConfig::from_env().wrap_err("Invalid broker configuration")?;
    let server_config = MetricsServerConfig::from_env().wrap_err("Invalid metrics server configuration")?;
    let rules = payment_rules_from_env().wrap_err("Invalid payment rules")?;

    info!(
        service = %broker_config.service_name,
        backend = %broker_config.backend,
        queue = %broker_config.queue,
        environment = ?environment,
        "Starting order worker"
    );

    let connection = nats_broker::connect_from_config(&broker_config, &[broker_config.queue.as_str()])
        .await
        .wrap_err("Failed to register order queue")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let listener = tokio::net::TcpListener::bind(server_config.address())
        .await
        .wrap_err_with(|| format!("Failed to bind metrics server on {}", server_config.address()))?;
    info!(addr = %server_config.address(), "Metrics server listening");
    let router = metrics_router(connection.clone());
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Metrics server failed");
        }
    });

    let consumed = run_consumer(
        connection.clone(),
        telemetry.tracer(),
        OrderProcessor::new(rules),
        consumer_config(&broker_config),
        shutdown_rx,
    )
    .await;

    connection.close().await;
    let _ = server.await;
    telemetry.shutdown();

    consumed.wrap_err("Order consumer stopped")?;
    info!("Order worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_orders::{OrderItem, PAYMENT_VALIDATION_FAILED};
    use messaging::testing::TestTracer;
    use messaging::{ConnectionConfig, InMemoryBroker, Publisher, PublisherConfig};
    use opentelemetry::trace::Status;
    use std::sync::Arc;

    const PAYMENT_VARS: [&str; 3] = ["PAYMENT_MAX_TOTAL", "PAYMENT_BLOCKED_CUSTOMERS", "PAYMENT_LATENCY_MS"];

    #[test]
    fn test_consumer_config_without_dead_letter() {
        let config = consumer_config(&BrokerConfig::default());
        assert_eq!(config.queue, "order_events");
        assert_eq!(config.prefetch, 1);
        assert!(config.dead_letter.is_none());
    }

    #[test]
    fn test_consumer_config_with_dead_letter() {
        let broker = BrokerConfig {
            max_deliveries: Some(4),
            dead_letter_queue: "parking_lot".to_string(),
            ..Default::default()
        };
        let policy = consumer_config(&broker).dead_letter.unwrap();
        assert_eq!(policy.max_deliveries, 4);
        assert_eq!(policy.queue, "parking_lot");
    }

    #[test]
    fn test_payment_rules_defaults() {
        temp_env::with_vars(PAYMENT_VARS.map(|key| (key, None::<&str>)), || {
            let rules = payment_rules_from_env().unwrap();
            assert_eq!(rules.max_total, None);
            assert!(rules.blocked_customers.is_empty());
            assert!(rules.latency.is_zero());
        });
    }

    #[test]
    fn test_payment_rules_from_env() {
        temp_env::with_vars(
            [
                ("PAYMENT_MAX_TOTAL", Some("1000")),
                ("PAYMENT_BLOCKED_CUSTOMERS", Some("c7, c8,,")),
                ("PAYMENT_LATENCY_MS", Some("25")),
            ],
            || {
                let rules = payment_rules_from_env().unwrap();
                assert_eq!(rules.max_total, Some(1000.0));
                assert_eq!(rules.blocked_customers.len(), 2);
                assert!(rules.blocked_customers.contains("c8"));
                assert_eq!(rules.latency, Duration::from_millis(25));
            },
        );
    }

    #[test]
    fn test_payment_rules_invalid_total() {
        temp_env::with_vars(
            [
                ("PAYMENT_MAX_TOTAL", Some("lots")),
                ("PAYMENT_BLOCKED_CUSTOMERS", None),
                ("PAYMENT_LATENCY_MS", None),
            ],
            || {
                let err = payment_rules_from_env().unwrap_err();
                assert!(err.to_string().contains("PAYMENT_MAX_TOTAL"));
            },
        );
    }

    #[tokio::test]
    async fn test_rejected_payment_is_dead_lettered() {
        let broker = InMemoryBroker::new();
        let connection = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::default());
        connection.register_queue("order_events").await.unwrap();
        connection.ensure_connected();
        connection.wait_until_connected().await.unwrap();

        let spans = TestTracer::new();
        let config = consumer_config(&BrokerConfig {
            max_deliveries: Some(2),
            ..Default::default()
        });
        let processor = OrderProcessor::new(PaymentRules::default().block_customer("c7"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = tokio::spawn(run_consumer(
            connection.clone(),
            spans.tracer.clone(),
            processor,
            config,
            shutdown_rx,
        ));

        let publisher = Publisher::new(connection.clone(), spans.tracer.clone(), PublisherConfig::default());
        let order = OrderEvent::new("c7", vec![OrderItem::new("sku-1", 1, 10.0)]);
        publisher.publish(&order, "order_events").await.unwrap();

        for _ in 0..200 {
            if broker.stats("order_events_dlq").await.depth == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let _ = shutdown_tx.send(true);
        consumer.await.unwrap().unwrap();

        assert_eq!(broker.stats("order_events_dlq").await.depth, 1);
        let receive = spans.spans_named("order_events receive");
        assert!(!receive.is_empty());
        assert!(
            receive
                .iter()
                .filter(|span| span.status != Status::Unset)
                .all(|span| span.status == Status::error(PAYMENT_VALIDATION_FAILED))
        );
        connection.close().await;
    }
}
