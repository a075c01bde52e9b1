//! Trace-propagating message pipeline.
//!
//! Publishes business events to durable broker queues and consumes them again,
//! joining the producer span and the consumer span into one distributed trace by
//! carrying the W3C trace context in message headers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  traceparent   ┌──────────┐             ┌──────────────┐
//! │  Publisher   │───────────────▶│  Broker  │────────────▶│ ConsumerLoop │
//! │ "{q} publish"│   in headers   │  queue   │  prefetch 1 │ "{q} receive"│
//! └──────┬───────┘                └──────────┘             └──────┬───────┘
//!        │                                                        │
//!        └──────────────────┐              ┌──────────────────────┘
//!                           ▼              ▼
//!                      ┌──────────────────────┐
//!                      │  ConnectionManager   │  fixed-delay reconnect,
//!                      │  (one channel)       │  queues declared per connect
//!                      └──────────────────────┘
//! ```
//!
//! Backends implement [`Broker`]: [`InMemoryBroker`] here, NATS JetStream in
//! `nats-broker`.
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::{
//!     ConnectionConfig, ConnectionManager, ConsumerConfig, ConsumerLoop, InMemoryBroker,
//!     Publisher, PublisherConfig,
//! };
//!
//! let connection = ConnectionManager::new(Arc::new(InMemoryBroker::new()), ConnectionConfig::default());
//! connection.register_queue("order_events").await?;
//! connection.ensure_connected();
//!
//! let publisher = Publisher::new(connection.clone(), tracer.clone(), PublisherConfig::new("order-service"));
//! publisher.publish(&order, "order_events").await?;
//!
//! let consumer = ConsumerLoop::new(connection, tracer, OrderProcessor::default(), ConsumerConfig::new("order_events"));
//! consumer.run(shutdown_rx).await?;
//! ```

pub mod broker;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod dlq;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod processor;
pub mod propagation;
pub mod publisher;
pub mod span;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use broker::{Broker, BrokerChannel, DeliveryStream};
pub use config::{
    BackoffStrategy, ConnectionConfig, ConsumerConfig, DeadLetterPolicy, PublisherConfig,
    QueueDef, dead_letter_queue_name,
};
pub use connection::{ConnectionManager, ConnectionState};
pub use consumer::ConsumerLoop;
pub use error::{BrokerError, ErrorCategory, MessagingError, ProcessingError};
pub use event::Event;
pub use memory::{InMemoryBroker, QueueStats};
pub use message::{Acknowledger, Delivery, HeaderKey, HeaderValue, Headers, Message};
pub use processor::{FailingProcessor, NoOpProcessor, Processor};
pub use propagation::{TraceContext, extract, inject};
pub use publisher::{PublishReceipt, Publisher};
pub use span::SpanGuard;
