//! Traced event publishing.

use crate::config::PublisherConfig;
use crate::connection::ConnectionManager;
use crate::error::MessagingError;
use crate::event::Event;
use crate::message::{HeaderKey, Headers, Message};
use crate::metrics::QueueMetrics;
use crate::propagation;
use crate::span::{SpanGuard, attributes};
use opentelemetry::trace::{SpanKind, TraceId};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;
use tracing::{debug, error, warn};

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event_id: String,
    pub queue: String,
    /// Trace the producer span belongs to
    pub trace_id: TraceId,
}

/// Publishes events as persistent JSON messages carrying the producer span's
/// trace context.
///
/// # Example
///
/// ```rust,ignore
/// let publisher = Publisher::new(connection.clone(), tracer, PublisherConfig::new("order-service"));
/// let receipt = publisher.publish(&order, "order_events").await?;
/// info!(event_id = %receipt.event_id, trace_id = %receipt.trace_id, "order published");
/// ```
#[derive(Clone)]
pub struct Publisher {
    connection: ConnectionManager,
    tracer: SdkTracer,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(connection: ConnectionManager, tracer: SdkTracer, config: PublisherConfig) -> Self {
        Self {
            connection,
            tracer,
            config,
        }
    }

    /// Publish `event` to `queue` as a new trace root.
    pub async fn publish<E: Event>(
        &self,
        event: &E,
        queue: &str,
    ) -> Result<PublishReceipt, MessagingError> {
        self.publish_with_context(event, queue, &Context::new()).await
    }

    /// Publish `event` to `queue` with the producer span as a child of `parent`.
    ///
    /// Exactly one producer span is started and ended per call. No local
    /// buffering or retry: while disconnected this fails with
    /// `ChannelUnavailable`.
    pub async fn publish_with_context<E: Event>(
        &self,
        event: &E,
        queue: &str,
        parent: &Context,
    ) -> Result<PublishReceipt, MessagingError> {
        let event_id = event.event_id();
        let metrics = QueueMetrics::new(queue);
        let span = SpanGuard::start(
            &self.tracer,
            format!("{queue} publish"),
            SpanKind::Producer,
            vec![
                KeyValue::new(attributes::MESSAGING_SYSTEM, self.connection.system()),
                KeyValue::new(attributes::MESSAGING_DESTINATION, queue.to_string()),
                KeyValue::new(attributes::MESSAGING_OPERATION, "publish"),
                KeyValue::new(attributes::MESSAGING_MESSAGE_ID, event_id.clone()),
            ],
            parent,
        );
        let trace_id = span.trace_id();

        let channel = match self.connection.channel() {
            Ok(channel) => channel,
            Err(e) => {
                warn!(queue, event_id = %event_id, "Publish rejected, no broker channel");
                metrics.publish_failed();
                span.end_error(&e);
                return Err(e);
            }
        };

        let body = match serde_json::to_vec(event) {
            Ok(body) => body,
            Err(e) => {
                let err = MessagingError::Serialization(e);
                error!(queue, event_id = %event_id, error = %err, "Failed to encode event");
                metrics.publish_failed();
                span.end_error(&err);
                return Err(err);
            }
        };
        span.set_attribute(KeyValue::new(
            attributes::MESSAGING_BODY_SIZE,
            body.len() as i64,
        ));

        let mut headers = self.headers(event, &event_id);
        propagation::inject(span.context(), &mut headers);

        if let Err(source) = channel.publish(queue, Message::persistent(body, headers)).await {
            let err = MessagingError::PublishFailed {
                queue: queue.to_string(),
                source,
            };
            error!(queue, event_id = %event_id, trace_id = %trace_id, error = %err, "Publish failed");
            metrics.publish_failed();
            span.end_error(&err);
            return Err(err);
        }

        metrics.published();
        debug!(queue, event_id = %event_id, trace_id = %trace_id, "Event published");
        span.end_ok();

        Ok(PublishReceipt {
            event_id,
            queue: queue.to_string(),
            trace_id,
        })
    }

    fn headers<E: Event>(&self, event: &E, event_id: &str) -> Headers {
        Headers::new()
            .with(HeaderKey::Service.as_ref(), self.config.service.as_str())
            .with(HeaderKey::Operation.as_ref(), "publish")
            .with(HeaderKey::EventId.as_ref(), event_id)
            .with(HeaderKey::EventType.as_ref(), event.event_type())
            .with(HeaderKey::ContentType.as_ref(), self.config.content_type.as_str())
    }
}
