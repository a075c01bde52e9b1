//! NATS JetStream backend for the `messaging` library.
//!
//! ```ignore
//! use messaging::{ConnectionConfig, ConnectionManager};
//! use nats_broker::{NatsBroker, NatsConfig};
//!
//! let broker = NatsBroker::new(NatsConfig::new("nats://localhost:4222"));
//! let connection = ConnectionManager::new(Arc::new(broker), ConnectionConfig::default());
//! connection.register_queue("order_events").await?;
//! connection.ensure_connected();
//! ```

mod broker;
pub mod config;
mod headers;

pub use broker::{NatsBroker, SYSTEM};
pub use config::NatsConfig;

#[cfg(feature = "config")]
mod factory;

#[cfg(feature = "config")]
pub use factory::{broker_from_config, connect_from_config};
