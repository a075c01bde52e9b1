//! Scoped spans with guaranteed end-on-exit.
//!
//! A [`SpanGuard`] owns the `Context` holding its span. The span is ended
//! exactly once: by `end_ok` / `end_error` / `end`, or by `Drop` on early return,
//! `?` propagation, or cancellation of the enclosing future.

use crate::propagation::TraceContext;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, TraceId, Tracer};
use opentelemetry::{Context, KeyValue};
use std::borrow::Cow;

/// Semantic-convention attribute keys used by the pipeline.
pub mod attributes {
    pub const MESSAGING_SYSTEM: &str = "messaging.system";
    pub const MESSAGING_DESTINATION: &str = "messaging.destination.name";
    pub const MESSAGING_OPERATION: &str = "messaging.operation";
    pub const MESSAGING_MESSAGE_ID: &str = "messaging.message.id";
    pub const MESSAGING_BODY_SIZE: &str = "messaging.message.body.size";
    pub const MESSAGING_DELIVERY_COUNT: &str = "messaging.message.delivery_count";
    pub const SERVICE_NAME: &str = "service.name";
}

/// Handle on a started span; ends the span when dropped.
#[derive(Debug)]
pub struct SpanGuard {
    cx: Context,
    ended: bool,
}

impl SpanGuard {
    /// Start a span as a child of whatever span `parent` holds.
    ///
    /// An empty `parent` makes the new span a trace root.
    pub fn start<T>(
        tracer: &T,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
    ) -> Self
    where
        T: Tracer,
        T::Span: Send + Sync + 'static,
    {
        let span = tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(tracer, parent);

        Self {
            cx: parent.with_span(span),
            ended: false,
        }
    }

    /// Context to pass to child operations.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn trace_context(&self) -> Option<TraceContext> {
        TraceContext::from_context(&self.cx)
    }

    pub fn trace_id(&self) -> TraceId {
        self.cx.span().span_context().trace_id()
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name, attributes);
    }

    /// Mark the operation successful and end the span.
    pub fn end_ok(mut self) {
        self.cx.span().set_status(Status::Ok);
        self.finish();
    }

    /// Record `error` as an exception event, set error status and end the span.
    pub fn end_error(mut self, error: &(dyn std::error::Error + 'static)) {
        let span = self.cx.span();
        span.record_error(error);
        span.set_status(Status::error(error.to_string()));
        self.finish();
    }

    /// End the span leaving its status untouched.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.ended {
            self.ended = true;
            self.cx.span().end();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.finish();
    }
}
