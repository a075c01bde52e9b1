//! Test helpers: a tracer that records finished spans in memory.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracer, SdkTracerProvider, SpanData};

/// Tracer wired to an [`InMemorySpanExporter`] through a simple (synchronous)
/// processor, so spans are visible as soon as they end.
pub struct TestTracer {
    pub provider: SdkTracerProvider,
    pub tracer: SdkTracer,
    exporter: InMemorySpanExporter,
}

impl TestTracer {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let tracer = provider.tracer("messaging-test");
        Self {
            provider,
            tracer,
            exporter,
        }
    }

    /// All spans ended so far.
    pub fn finished(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().unwrap_or_default()
    }

    pub fn spans_named(&self, name: &str) -> Vec<SpanData> {
        self.finished()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }

    /// String form of an attribute value on `span`.
    pub fn attribute(&self, span: &SpanData, key: &str) -> Option<String> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    pub fn reset(&self) {
        self.exporter.reset();
    }
}

impl Default for TestTracer {
    fn default() -> Self {
        Self::new()
    }
}
