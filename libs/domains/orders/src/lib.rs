//! Orders Domain
//!
//! Order events published by the order service and the payment validation
//! applied by the order worker.
//!
//! ```text
//! order-producer ──publish──▶ order_events ──consume──▶ order-worker
//!                                                        └─ OrderProcessor
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_orders::{OrderEvent, OrderItem, OrderProcessor, OrderQueue, PaymentRules};
//! use messaging::ConsumerConfig;
//!
//! let processor = OrderProcessor::new(PaymentRules::default().with_max_total(1000.0));
//! let consumer = ConsumerLoop::new(connection, tracer, processor, ConsumerConfig::from_def::<OrderQueue>());
//! ```

pub mod models;
pub mod processor;
pub mod queue;

pub use models::{OrderEvent, OrderItem, OrderStatus};
pub use processor::{OrderProcessor, PAYMENT_VALIDATION_FAILED, PaymentRules};
pub use queue::OrderQueue;
