//! Outbound publication of committed events onto the partitioned topic log.
//!
//! The publisher is at-least-once: transient delivery errors are retried up
//! to a bounded policy, hard failures surface to the caller, and a periodic
//! [`OutboxSweeper`] republishes anything the store holds beyond the
//! publisher's high-water mark. The projection side deduplicates on
//! `(aggregate_id, version)`, which is what makes republication safe.

pub mod error;
pub mod kafka;
pub mod marks;
pub mod memory;
pub mod retry;
pub mod sweep;
pub mod topics;

pub use error::{PublishError, SweepError};
pub use kafka::KafkaEventPublisher;
pub use marks::HighWaterMarks;
pub use memory::InMemoryEventPublisher;
pub use retry::RetryPolicy;
pub use sweep::OutboxSweeper;
pub use topics::{DEAD_LETTER_TOPIC, ORDER_TOPICS, topic_for_event};

use async_trait::async_trait;
use event_store::EventEnvelope;

/// Pushes committed events to the partitioned log.
///
/// Implementations must be shareable across command-handler tasks; each
/// call publishes its events in order, keyed by aggregate id so one
/// aggregate's events land on one partition.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, events: &[EventEnvelope]) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<P> {
    async fn publish(&self, events: &[EventEnvelope]) -> Result<(), PublishError> {
        (**self).publish(events).await
    }
}
