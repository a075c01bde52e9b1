//! Observability for the order pipeline.
//!
//! This crate provides:
//! - OTLP/HTTP span and log export ([`telemetry`])
//! - Prometheus rendering of the `messaging_*` metrics
//! - An axum router serving `/metrics`, `/health` and `/ready`
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, init_observability, metrics_router, TelemetryConfig};
//!
//! let telemetry = init_observability(&Environment::from_env(), &TelemetryConfig::from_env()?)?;
//! init_metrics()?;
//! let tracer = telemetry.tracer();
//!
//! let app = metrics_router(connection.clone());
//! ```

pub mod telemetry;

pub use telemetry::{Telemetry, TelemetryConfig, TelemetryError, init_observability, init_telemetry};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use messaging::ConnectionManager;
use messaging::metrics as names;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Later calls return the same handle.
pub fn init_metrics() -> Result<&'static PrometheusHandle, TelemetryError> {
    METRICS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;

        info!("Prometheus metrics recorder initialized");
        register_metric_descriptions();

        Ok(handle)
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Axum handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub broker: String,
    pub system: &'static str,
}

fn health(connection: &ConnectionManager) -> Health {
    Health {
        status: if connection.is_connected() { "ok" } else { "degraded" },
        broker: connection.state().to_string(),
        system: connection.system(),
    }
}

/// Liveness check handler.
///
/// Always 200: a broker outage is retried in process and must not get the
/// worker restarted.
pub async fn health_handler(State(connection): State<ConnectionManager>) -> (StatusCode, Json<Health>) {
    (StatusCode::OK, Json(health(&connection)))
}

/// Readiness check handler: 200 while the broker connection is up, 503 otherwise.
pub async fn ready_handler(State(connection): State<ConnectionManager>) -> (StatusCode, Json<Health>) {
    let code = if connection.is_connected() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health(&connection)))
}

/// `/metrics`, `/health` and `/ready` for a worker process.
pub fn metrics_router(connection: ConnectionManager) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(connection)
}

fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(names::MESSAGES_PUBLISHED, "Messages published by queue");
    describe_counter!(names::PUBLISH_FAILURES, "Publishes that failed by queue");
    describe_counter!(names::MESSAGES_RECEIVED, "Deliveries received by queue");
    describe_counter!(names::MESSAGES_ACKED, "Deliveries acknowledged after successful processing");
    describe_counter!(
        names::MESSAGES_REQUEUED,
        "Deliveries returned to the queue after a processing failure"
    );
    describe_counter!(names::MESSAGES_DEAD_LETTERED, "Deliveries moved to a dead-letter queue");
    describe_histogram!(names::PROCESSING_DURATION, "Processing callback duration in seconds");
    describe_counter!(names::RECONNECT_ATTEMPTS, "Broker connection attempts");
    describe_gauge!(names::CONNECTION_UP, "1 while the broker connection is up");
}
