//! Delivery of events to subscription callbacks.

pub mod dispatcher;
pub mod error;
pub mod signing;

use crate::event::TweetCreatedEvent;
use crate::model::CallbackTarget;

/// Result of one delivery attempt. Informational only; nothing retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Rejected { status: u16 },
    Failed,
}

/// Receiver of events produced by poll cycles.
///
/// Implementations must not fail: delivery problems are logged and dropped.
#[async_trait::async_trait]
pub trait CallbackSink: Send + Sync {
    async fn deliver(&self, target: &CallbackTarget, event: &TweetCreatedEvent) -> DeliveryStatus;
}
