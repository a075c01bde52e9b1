//! Data models for the orders domain.

use chrono::{DateTime, Utc};
use messaging::Event;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle state carried on an order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    Shipped,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl OrderItem {
    pub fn new(sku: impl Into<String>, quantity: u32, unit_price: f64) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            unit_price,
        }
    }

    pub fn subtotal(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

/// Order event as it travels on the `order_events` queue.
///
/// Wire shape: `{orderId, customerId, timestamp, status, items, total}` with an
/// ISO-8601 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub order_id: String,
    pub customer_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: OrderStatus,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    pub total: f64,
}

impl OrderEvent {
    /// New order in `Created` state; the total is the sum of item subtotals.
    pub fn new(customer_id: impl Into<String>, items: Vec<OrderItem>) -> Self {
        let total = items.iter().map(OrderItem::subtotal).sum();
        Self {
            order_id: Uuid::now_v7().to_string(),
            customer_id: customer_id.into(),
            timestamp: Utc::now(),
            status: OrderStatus::Created,
            items,
            total,
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = order_id.into();
        self
    }

    /// Override the computed total (for orders priced outside their items).
    pub fn with_total(mut self, total: f64) -> Self {
        self.total = total;
        self
    }
}

impl Event for OrderEvent {
    fn event_id(&self) -> String {
        self.order_id.clone()
    }

    fn event_type(&self) -> &'static str {
        "order.created"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_camel_case() {
        let order = OrderEvent::new("c1", vec![OrderItem::new("sku-1", 2, 5.0)]).with_order_id("o1");
        let json = serde_json::to_value(&order).unwrap();

        assert_eq!(json["orderId"], "o1");
        assert_eq!(json["customerId"], "c1");
        assert_eq!(json["status"], "created");
        assert_eq!(json["items"][0]["unitPrice"], 5.0);
        assert_eq!(json["total"], 10.0);
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_decodes_minimal_payload() {
        let order: OrderEvent = serde_json::from_str(
            r#"{"orderId":"o1","customerId":"c1","timestamp":"2024-01-15T10:30:00Z","status":"paid","total":10}"#,
        )
        .unwrap();

        assert_eq!(order.event_id(), "o1");
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.items.is_empty());
        assert_eq!(order.total, 10.0);
    }

    #[test]
    fn test_status_names() {
        assert_eq!(OrderStatus::Cancelled.to_string(), "cancelled");
        assert_eq!("shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
    }
}
