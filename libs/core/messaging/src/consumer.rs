//! Traced consumer loop.

use crate::broker::BrokerChannel;
use crate::config::ConsumerConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dlq;
use crate::error::{MessagingError, ProcessingError};
use crate::event::Event;
use crate::message::{Delivery, HeaderKey};
use crate::metrics::QueueMetrics;
use crate::processor::Processor;
use crate::propagation;
use crate::span::{SpanGuard, attributes};
use futures::StreamExt;
use opentelemetry::trace::{SpanKind, TraceId};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause before re-subscribing after a failed `consume` on an open channel.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Consumes one queue, one delivery at a time.
///
/// For every delivery the loop:
/// 1. extracts the producer's trace context from the headers (or starts a root)
/// 2. opens a consumer span `"{queue} receive"`
/// 3. decodes the JSON body and runs the processor inside a nested internal span
/// 4. acks on success; on failure nacks with requeue, or dead-letters when a
///    [`DeadLetterPolicy`](crate::DeadLetterPolicy) says so
///
/// Failures never stop the loop. It ends when the shutdown signal fires; a
/// delivery in flight at that moment is left unacknowledged for the broker to
/// redeliver. When the connection drops the loop waits for the
/// [`ConnectionManager`] to reconnect and subscribes again.
pub struct ConsumerLoop<E: Event, P: Processor<E>> {
    connection: ConnectionManager,
    tracer: SdkTracer,
    processor: P,
    config: ConsumerConfig,
    metrics: QueueMetrics,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Event, P: Processor<E>> ConsumerLoop<E, P> {
    pub fn new(
        connection: ConnectionManager,
        tracer: SdkTracer,
        processor: P,
        config: ConsumerConfig,
    ) -> Self {
        let metrics = QueueMetrics::new(&config.queue);
        Self {
            connection,
            tracer,
            processor,
            config,
            metrics,
            _marker: PhantomData,
        }
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    /// Run until `shutdown` turns true or the connection manager is closed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MessagingError> {
        self.connection.register_queue(&self.config.queue).await?;
        if let Some(policy) = &self.config.dead_letter {
            self.connection.register_queue(&policy.queue).await?;
        }

        info!(
            queue = %self.config.queue,
            prefetch = self.config.prefetch,
            processor = self.processor.name(),
            dead_letter = ?self.config.dead_letter.as_ref().map(|p| p.queue.as_str()),
            "Starting consumer loop"
        );

        while let Some(channel) = self.wait_for_channel(&mut shutdown).await {
            let mut deliveries = match channel.consume(&self.config.queue, self.config.prefetch).await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    warn!(queue = %self.config.queue, error = %e, "Failed to subscribe, retrying");
                    tokio::select! {
                        _ = wait_true(&mut shutdown) => break,
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => continue,
                    }
                }
            };
            debug!(queue = %self.config.queue, "Subscribed");

            loop {
                let next = tokio::select! {
                    biased;
                    _ = wait_true(&mut shutdown) => None,
                    next = deliveries.next() => Some(next),
                };

                match next {
                    None => {
                        info!(queue = %self.config.queue, "Shutdown signal received, stopping consumer");
                        return Ok(());
                    }
                    Some(Some(Ok(delivery))) => {
                        tokio::select! {
                            biased;
                            _ = wait_true(&mut shutdown) => {
                                info!(
                                    queue = %self.config.queue,
                                    "Shutdown during processing, delivery left unacknowledged"
                                );
                                return Ok(());
                            }
                            _ = self.handle(delivery) => {}
                        }
                    }
                    Some(Some(Err(e))) => {
                        let err = MessagingError::ConnectionLost(e.to_string());
                        warn!(queue = %self.config.queue, error = %err, "Delivery stream failed");
                        break;
                    }
                    Some(None) => {
                        info!(queue = %self.config.queue, "Delivery stream ended, waiting for reconnect");
                        break;
                    }
                }
            }
        }

        info!(queue = %self.config.queue, "Consumer loop stopped");
        Ok(())
    }

    /// Next open channel; `None` on shutdown or when the manager is closed.
    async fn wait_for_channel(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<dyn BrokerChannel>> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                _ = wait_true(shutdown) => return None,
                connected = self.connection.wait_until_connected() => {
                    if connected.is_err() {
                        return None;
                    }
                }
            }

            match self.connection.channel() {
                Ok(channel) => return Some(channel),
                Err(_) => {
                    // Channel closed, manager not yet back to connecting.
                    let mut state = self.connection.watch_state();
                    tokio::select! {
                        _ = wait_true(shutdown) => return None,
                        _ = wait_not_connected(&mut state) => {}
                    }
                }
            }
        }
    }

    /// Process one delivery and settle it exactly once.
    async fn handle(&self, delivery: Delivery) {
        let started = Instant::now();
        self.metrics.received();

        let queue = self.config.queue.as_str();
        let event_id = delivery
            .headers()
            .get_str(HeaderKey::EventId.as_ref())
            .unwrap_or_default()
            .to_string();
        let delivery_count = delivery.delivery_count();

        let parent = propagation::parent_context(delivery.headers());
        let span = SpanGuard::start(
            &self.tracer,
            format!("{queue} receive"),
            SpanKind::Consumer,
            vec![
                KeyValue::new(attributes::MESSAGING_SYSTEM, self.connection.system()),
                KeyValue::new(attributes::MESSAGING_DESTINATION, queue.to_string()),
                KeyValue::new(attributes::MESSAGING_OPERATION, "receive"),
                KeyValue::new(attributes::MESSAGING_BODY_SIZE, delivery.body().len() as i64),
                KeyValue::new(attributes::MESSAGING_MESSAGE_ID, event_id.clone()),
                KeyValue::new(attributes::MESSAGING_DELIVERY_COUNT, i64::from(delivery_count)),
            ],
            &parent,
        );
        let trace_id = span.trace_id();

        if delivery.is_redelivery() {
            debug!(
                queue,
                event_id = %event_id,
                delivery_count,
                "Processing redelivered message"
            );
        }

        match self.process(&delivery, span.context()).await {
            Ok(()) => match delivery.ack().await {
                Ok(()) => {
                    self.metrics.acked(started.elapsed());
                    debug!(
                        queue,
                        event_id = %event_id,
                        trace_id = %trace_id,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Message processed"
                    );
                    span.end_ok();
                }
                Err(e) => {
                    let err = MessagingError::Broker(e);
                    warn!(queue, event_id = %event_id, error = %err, "Ack failed, broker will redeliver");
                    span.end_error(&err);
                }
            },
            Err(err) => {
                error!(
                    queue,
                    event_id = %event_id,
                    trace_id = %trace_id,
                    delivery_count,
                    category = %err.category(),
                    error = %err,
                    "Message processing failed"
                );
                self.settle_failure(delivery, &err, &span, trace_id, started)
                    .await;
                span.end_error(&err);
            }
        }
    }

    /// Decode the body and run the processor inside an internal span.
    async fn process(&self, delivery: &Delivery, cx: &Context) -> Result<(), MessagingError> {
        let event: E = serde_json::from_slice(delivery.body()).map_err(ProcessingError::from)?;

        let span = SpanGuard::start(
            &self.tracer,
            self.processor.name(),
            SpanKind::Internal,
            vec![KeyValue::new(attributes::MESSAGING_MESSAGE_ID, event.event_id())],
            cx,
        );

        match self.processor.process(&event, span.context()).await {
            Ok(()) => {
                span.end_ok();
                Ok(())
            }
            Err(e) => {
                span.end_error(&e);
                Err(e.into())
            }
        }
    }

    /// Dead-letter the delivery when the policy says so, otherwise nack with requeue.
    async fn settle_failure(
        &self,
        delivery: Delivery,
        err: &MessagingError,
        span: &SpanGuard,
        trace_id: TraceId,
        started: Instant,
    ) {
        let queue = self.config.queue.as_str();
        let category = err.category();
        let delivery_count = delivery.delivery_count();

        let policy = self
            .config
            .dead_letter
            .as_ref()
            .filter(|policy| policy.should_dead_letter(delivery_count, category));

        if let Some(policy) = policy {
            let message = dlq::dead_letter_message(&delivery, queue, &err.to_string());
            let published = match self.connection.channel() {
                Ok(channel) => channel
                    .publish(&policy.queue, message)
                    .await
                    .map_err(MessagingError::from),
                Err(e) => Err(e),
            };

            match published {
                Ok(()) => {
                    span.add_event(
                        "dead_lettered",
                        vec![KeyValue::new("messaging.dead_letter.queue", policy.queue.clone())],
                    );
                    self.metrics.dead_lettered(&category.to_string());
                    warn!(
                        queue,
                        dead_letter_queue = %policy.queue,
                        trace_id = %trace_id,
                        delivery_count,
                        "Moved message to dead-letter queue"
                    );
                    if let Err(e) = delivery.ack().await {
                        warn!(queue, error = %e, "Ack after dead-lettering failed");
                    }
                    return;
                }
                Err(e) => {
                    warn!(queue, error = %e, "Dead-letter publish failed, requeueing instead");
                }
            }
        }

        match delivery.nack(true).await {
            Ok(()) => self.metrics.requeued(&category.to_string(), started.elapsed()),
            Err(e) => warn!(queue, error = %e, "Nack failed, broker will redeliver on channel close"),
        }
    }
}

async fn wait_true(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|v| *v).await;
}

async fn wait_not_connected(rx: &mut watch::Receiver<ConnectionState>) {
    let _ = rx.wait_for(|s| *s != ConnectionState::Connected).await;
}
