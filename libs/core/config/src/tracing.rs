use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

/// Extra layer installed beneath the formatter, e.g. an OpenTelemetry log bridge.
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Crates whose own logging must not reach an exporting layer (they are the exporter).
const QUIET_DIRECTIVES: &str = "hyper=off,h2=off,reqwest=off,tonic=off,opentelemetry=off";

/// Install color-eyre with a project-standard configuration.
///
/// Call this early in main() before any fallible operations. Safe to call
/// multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize tracing with environment-aware configuration and error span capture.
///
/// - **Production** (`APP_ENV=production`): JSON lines, module targets hidden
/// - **Development** (default): pretty-printed
///
/// Both include `ErrorLayer` so eyre reports carry span traces. `RUST_LOG`
/// overrides the default filter.
///
/// Safe to call multiple times; later calls are ignored (common in tests).
pub fn init_tracing(environment: &Environment) {
    init_tracing_with_layer(environment, None);
}

/// Same as [`init_tracing`], with an additional layer such as
/// `opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge`.
pub fn init_tracing_with_layer(environment: &Environment, extra: Option<BoxedLayer>) {
    let is_production = environment.is_production();
    let filter = default_filter(is_production);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(extra)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(extra)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => {
            info!(environment = ?environment, "Tracing initialized");
        }
        Err(_) => {
            debug!("Tracing already initialized, skipping re-initialization");
        }
    }
}

fn default_filter(is_production: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if is_production { "info" } else { "debug" };
        EnvFilter::new(format!("{level},{QUIET_DIRECTIVES}"))
    })
}
