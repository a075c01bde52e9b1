//! JetStream implementation of the broker traits.

use crate::config::{self, NatsConfig};
use crate::headers;
use async_nats::jetstream::consumer::{AckPolicy, pull};
use async_nats::jetstream::{self as js, AckKind};
use async_nats::{Client, Event};
use async_trait::async_trait;
use futures::StreamExt;
use messaging::{
    Acknowledger, Broker, BrokerChannel, BrokerError, Delivery, DeliveryStream, Message,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Value of the `messaging.system` attribute for this backend.
pub const SYSTEM: &str = "nats";

/// Opens JetStream channels.
///
/// Each queue maps to a file-backed work-queue stream with one durable pull
/// consumer. Prefetch maps to the consumer's `max_ack_pending`, nack with
/// requeue to `Nak`, nack without requeue to `Term`. Unacknowledged messages
/// are redelivered after `ack_wait`.
#[derive(Debug, Clone)]
pub struct NatsBroker {
    config: NatsConfig,
}

impl NatsBroker {
    pub fn new(config: NatsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

#[async_trait]
impl Broker for NatsBroker {
    #[instrument(skip(self), fields(url = %self.config.url))]
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let closed = Arc::new(watch::Sender::new(false));

        let on_event = closed.clone();
        let client = async_nats::ConnectOptions::new()
            .name(&self.config.connection_name)
            .connection_timeout(self.config.connect_timeout)
            .event_callback(move |event| {
                let closed = on_event.clone();
                async move {
                    match event {
                        Event::Disconnected | Event::Closed => {
                            warn!(event = %event, "NATS connection lost");
                            closed.send_replace(true);
                        }
                        other => debug!(event = %other, "NATS connection event"),
                    }
                }
            })
            .connect(&self.config.url)
            .await
            .map_err(|e| BrokerError::Connect(format!("{}: {e}", self.config.url)))?;

        info!(url = %self.config.url, "Connected to NATS");

        Ok(Arc::new(NatsChannel {
            jetstream: js::new(client.clone()),
            client,
            config: self.config.clone(),
            closed,
        }))
    }

    fn system(&self) -> &'static str {
        SYSTEM
    }
}

struct NatsChannel {
    client: Client,
    jetstream: js::Context,
    config: NatsConfig,
    closed: Arc<watch::Sender<bool>>,
}

impl NatsChannel {
    fn check_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::Closed)
        }
    }
}

#[async_trait]
impl BrokerChannel for NatsChannel {
    #[instrument(skip(self))]
    async fn assert_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.check_open()?;

        let name = config::stream_name(queue);
        self.jetstream
            .get_or_create_stream(config::queue_stream(queue, &self.config))
            .await
            .map_err(|e| BrokerError::Declare(format!("{name}: {e}")))?;

        debug!(stream = %name, "Stream ready");
        Ok(())
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<(), BrokerError> {
        self.check_open()?;

        let (body, headers, persistent) = message.into_parts();
        if !persistent {
            debug!(queue, "JetStream streams are file-backed, storing transient message durably");
        }

        let ack = self
            .jetstream
            .publish_with_headers(config::subject(queue), headers::to_nats(&headers), body.into())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        debug!(queue, stream = %ack.stream, sequence = ack.sequence, "Published message");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        self.check_open()?;

        let name = config::stream_name(queue);
        let stream = self
            .jetstream
            .get_stream(&name)
            .await
            .map_err(|_| BrokerError::QueueNotFound(queue.to_string()))?;

        let durable = config::durable_name(queue);
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_ack_pending: i64::from(prefetch.max(1)),
                    filter_subject: config::subject(queue),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Consume(format!("{durable}: {e}")))?;

        let messages = consumer
            .stream()
            .max_messages_per_batch(1)
            .messages()
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        debug!(stream = %name, consumer = %durable, prefetch, "Pull consumer subscribed");

        let closed = wait_closed(self.closed.subscribe());
        let deliveries = messages.take_until(closed).map(|item| match item {
            Ok(message) => Ok(into_delivery(message)),
            Err(e) => Err(BrokerError::Consume(e.to_string())),
        });
        Ok(deliveries.boxed())
    }

    async fn closed(&self) {
        wait_closed(self.closed.subscribe()).await;
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection on close");
        }
        self.closed.send_replace(true);
        info!("NATS channel closed");
    }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

fn into_delivery(message: js::Message) -> Delivery {
    let delivery_count = match message.info() {
        Ok(info) => u32::try_from(info.delivered).unwrap_or(u32::MAX),
        Err(e) => {
            warn!(error = %e, "Failed to get message info, assuming first delivery");
            1
        }
    };
    let headers = message
        .headers
        .as_ref()
        .map(headers::from_nats)
        .unwrap_or_default();
    let body = message.payload.to_vec();

    Delivery::new(
        Message::persistent(body, headers),
        delivery_count,
        Box::new(NatsAcker { message }),
    )
}

struct NatsAcker {
    message: js::Message,
}

#[async_trait]
impl Acknowledger for NatsAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let kind = if requeue { AckKind::Nak(None) } else { AckKind::Term };
        self.message
            .ack_with(kind)
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))
    }
}
