//! OpenTelemetry bootstrap: span and log providers exporting over OTLP/HTTP.
//!
//! Nothing is installed globally. Callers take a tracer from [`Telemetry`]
//! and hand it to publishers and consumers explicitly.

use core_config::tracing::{BoxedLayer, init_tracing_with_layer};
use core_config::{ConfigError, Environment, FromEnv, env_optional, env_or_default};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("failed to build OTLP {signal} exporter: {details}")]
    Exporter { signal: &'static str, details: String },

    #[error("failed to install Prometheus recorder: {0}")]
    Metrics(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Where and as whom telemetry is exported
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute
    pub service_name: String,

    /// OTLP/HTTP collector base URL; `None` keeps spans in process
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            otlp_endpoint: None,
        }
    }

    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    fn signal_url(&self, path: &str) -> Option<String> {
        self.otlp_endpoint
            .as_deref()
            .map(|base| format!("{}/v1/{path}", base.trim_end_matches('/')))
    }
}

impl FromEnv for TelemetryConfig {
    /// Reads:
    /// - SERVICE_NAME: defaults to "order-service"
    /// - OTEL_EXPORTER_OTLP_ENDPOINT: unset disables export
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            service_name: env_or_default("SERVICE_NAME", "order-service"),
            otlp_endpoint: env_optional("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

/// Handle to the span and log providers. Call [`Telemetry::shutdown`] before
/// exit so batched spans are flushed.
pub struct Telemetry {
    service_name: String,
    tracer_provider: SdkTracerProvider,
    logger_provider: Option<SdkLoggerProvider>,
}

impl Telemetry {
    /// Tracer for publishers and consumer loops.
    pub fn tracer(&self) -> SdkTracer {
        self.tracer_provider.tracer(self.service_name.clone())
    }

    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// `tracing` layer forwarding log records to the OTLP log exporter.
    pub fn log_layer(&self) -> Option<OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>> {
        self.logger_provider
            .as_ref()
            .map(OpenTelemetryTracingBridge::new)
    }

    pub fn is_exporting(&self) -> bool {
        self.logger_provider.is_some()
    }

    /// Flush and stop both providers. Export errors are logged, never returned.
    pub fn shutdown(&self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            warn!(error = %e, "Failed to shut down tracer provider");
        }
        if let Some(provider) = &self.logger_provider {
            if let Err(e) = provider.shutdown() {
                warn!(error = %e, "Failed to shut down logger provider");
            }
        }
    }
}

/// Build span and log providers for `config`.
///
/// With an endpoint, spans and log records are batched and exported to
/// `{endpoint}/v1/traces` and `{endpoint}/v1/logs`. Without one, spans are
/// created and dropped in process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Telemetry, TelemetryError> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    let (Some(traces_url), Some(logs_url)) = (config.signal_url("traces"), config.signal_url("logs")) else {
        info!(service = %config.service_name, "No OTLP endpoint configured, spans stay in process");
        return Ok(Telemetry {
            service_name: config.service_name.clone(),
            tracer_provider: SdkTracerProvider::builder().with_resource(resource).build(),
            logger_provider: None,
        });
    };

    let span_exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(traces_url.clone())
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "span",
            details: e.to_string(),
        })?;

    let log_exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(logs_url)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "log",
            details: e.to_string(),
        })?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_exporter)
        .build();

    let logger_provider = SdkLoggerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(log_exporter)
        .build();

    info!(service = %config.service_name, endpoint = %traces_url, "OTLP export enabled");

    Ok(Telemetry {
        service_name: config.service_name.clone(),
        tracer_provider,
        logger_provider: Some(logger_provider),
    })
}

/// Build telemetry and install the `tracing` subscriber, bridging log records
/// to OTLP when exporting.
pub fn init_observability(
    environment: &Environment,
    config: &TelemetryConfig,
) -> Result<Telemetry, TelemetryError> {
    let telemetry = init_telemetry(config)?;
    let bridge = telemetry.log_layer().map(|layer| Box::new(layer) as BoxedLayer);
    init_tracing_with_layer(environment, bridge);
    Ok(telemetry)
}
