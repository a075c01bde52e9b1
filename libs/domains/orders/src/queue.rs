use messaging::QueueDef;

/// The `order_events` work queue.
pub struct OrderQueue;

impl QueueDef for OrderQueue {
    const QUEUE_NAME: &'static str = "order_events";
    const DLQ_NAME: &'static str = "order_events_dlq";
}
