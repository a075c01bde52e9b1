//! W3C Trace Context propagation through message headers.
//!
//! `inject` writes `traceparent` (and `tracestate` when present) into a
//! [`Headers`] map; `extract` reads them back. Extraction fails soft: missing or
//! malformed keys yield `None` and the consumer starts a new root span.
//!
//! # Example
//!
//! ```rust
//! use messaging::Headers;
//! use messaging::propagation::{extract, inject};
//! use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
//! use opentelemetry::Context;
//!
//! let span_context = SpanContext::new(
//!     TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
//!     SpanId::from_hex("00f067aa0ba902b7").unwrap(),
//!     TraceFlags::SAMPLED,
//!     true,
//!     TraceState::default(),
//! );
//! let cx = Context::new().with_remote_span_context(span_context);
//!
//! let mut headers = Headers::new();
//! inject(&cx, &mut headers);
//!
//! let extracted = extract(&headers).unwrap();
//! assert_eq!(extracted.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
//! ```

use crate::message::Headers;
use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId};
use opentelemetry_sdk::propagation::TraceContextPropagator;

/// Header carrying the W3C trace parent.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Header carrying vendor trace state.
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Carrier for injecting trace context into message headers.
pub struct HeaderInjector<'a>(pub &'a mut Headers);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value);
    }
}

/// Carrier for reading trace context from message headers.
pub struct HeaderExtractor<'a>(pub &'a Headers);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get_str(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().collect()
    }
}

/// Position of a span in a distributed trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext(SpanContext);

impl TraceContext {
    /// The valid span context active in `cx`, if any.
    pub fn from_context(cx: &Context) -> Option<Self> {
        let span_context = cx.span().span_context().clone();
        span_context.is_valid().then_some(Self(span_context))
    }

    pub fn trace_id(&self) -> TraceId {
        self.0.trace_id()
    }

    pub fn span_id(&self) -> SpanId {
        self.0.span_id()
    }

    pub fn flags(&self) -> TraceFlags {
        self.0.trace_flags()
    }

    pub fn is_sampled(&self) -> bool {
        self.0.is_sampled()
    }

    /// True when the context came from another process.
    pub fn is_remote(&self) -> bool {
        self.0.is_remote()
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.0
    }

    /// A context whose only content is this span as a remote parent.
    pub fn into_parent(self) -> Context {
        Context::new().with_remote_span_context(self.0)
    }
}

/// Write the span context active in `cx` into `headers`.
///
/// No-op when `cx` holds no valid span context.
pub fn inject(cx: &Context, headers: &mut Headers) {
    if TraceContext::from_context(cx).is_none() {
        return;
    }
    TraceContextPropagator::new().inject_context(cx, &mut HeaderInjector(headers));
}

/// Read a trace context back from `headers`.
pub fn extract(headers: &Headers) -> Option<TraceContext> {
    let cx = TraceContextPropagator::new().extract(&HeaderExtractor(headers));
    TraceContext::from_context(&cx)
}

/// Parent context for a consumer span: the extracted remote span, or an empty
/// context so the caller starts a new root.
pub fn parent_context(headers: &Headers) -> Context {
    extract(headers)
        .map(TraceContext::into_parent)
        .unwrap_or_else(Context::new)
}
