#![allow(dead_code)]

use messaging::{ConnectionConfig, ConnectionManager, Event, InMemoryBroker, QueueStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use test_utils::wait_until;

pub const QUEUE: &str = "order_events";

/// Order payload in its wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<serde_json::Value>,
    pub total: f64,
}

impl Event for Order {
    fn event_id(&self) -> String {
        self.order_id.clone()
    }

    fn event_type(&self) -> &'static str {
        "order.created"
    }
}

pub fn order(id: &str) -> Order {
    Order {
        order_id: id.to_string(),
        customer_id: "c1".to_string(),
        items: vec![],
        total: 10.0,
    }
}

/// Connected manager with the order queue declared.
pub async fn connected(broker: &InMemoryBroker) -> ConnectionManager {
    let connection = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::default());
    connection.register_queue(QUEUE).await.unwrap();
    connection.ensure_connected();
    connection.wait_until_connected().await.unwrap();
    connection
}

/// Wait until the order queue counters satisfy `check`.
pub async fn wait_for_stats(broker: &InMemoryBroker, check: impl Fn(&QueueStats) -> bool) {
    let check = &check;
    wait_until(Duration::from_secs(2), "order queue counters", move || async move {
        check(&broker.stats(QUEUE).await)
    })
    .await;
}
