//! Dead-letter message construction.
//!
//! A dead-lettered message keeps the original body and headers, trace context
//! included, and gains `x-death-reason`, `x-original-queue` and
//! `x-delivery-count`.

use crate::message::{Delivery, HeaderKey, Message};

/// Build the dead-letter copy of `delivery`, received from `queue`.
pub fn dead_letter_message(delivery: &Delivery, queue: &str, reason: &str) -> Message {
    let mut headers = delivery.headers().clone();
    headers.insert(HeaderKey::DeathReason.as_ref(), reason);
    headers.insert(HeaderKey::OriginalQueue.as_ref(), queue);
    headers.insert(HeaderKey::DeliveryCount.as_ref(), delivery.delivery_count());

    Message::persistent(delivery.body().to_vec(), headers)
}
