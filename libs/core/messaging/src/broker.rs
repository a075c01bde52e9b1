//! Broker abstraction.
//!
//! A [`Broker`] opens connections; a [`BrokerChannel`] is one open connection
//! offering durable queues, persistent publish and manually acknowledged
//! consumption. Backends: [`InMemoryBroker`](crate::memory::InMemoryBroker)
//! and the NATS JetStream broker in `nats-broker`.

use crate::error::BrokerError;
use crate::message::{Delivery, Message};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Stream of deliveries from one queue subscription.
///
/// Ends (or yields an error) when the underlying channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Opens connections to a message broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open a new connection and channel.
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Value for the `messaging.system` span attribute.
    fn system(&self) -> &'static str;
}

/// One open broker channel.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declare a durable queue. Idempotent.
    async fn assert_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Send `message` to `queue`, resolving once the broker accepted it.
    async fn publish(&self, queue: &str, message: Message) -> Result<(), BrokerError>;

    /// Subscribe to `queue` with at most `prefetch` unacknowledged deliveries.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError>;

    /// Resolves when the channel closes, whoever closed it.
    async fn closed(&self);

    fn is_open(&self) -> bool;

    /// Close the channel. Unacknowledged deliveries return to their queues.
    async fn close(&self);
}
