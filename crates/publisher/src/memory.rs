use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::marks::HighWaterMarks;
use crate::{EventPublisher, PublishError};

/// In-memory publisher for tests.
///
/// Records everything published, advances the shared high-water marks the
/// way the Kafka publisher does, and can be told to fail its next calls to
/// exercise the store-ahead-of-publisher recovery path.
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    published: Arc<RwLock<Vec<EventEnvelope>>>,
    marks: HighWaterMarks,
    failures_remaining: Arc<AtomicUsize>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marks(marks: HighWaterMarks) -> Self {
        Self {
            marks,
            ..Self::default()
        }
    }

    pub fn marks(&self) -> HighWaterMarks {
        self.marks.clone()
    }

    /// Everything published so far, in publish order.
    pub async fn published(&self) -> Vec<EventEnvelope> {
        self.published.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    /// Makes the next `n` publish calls fail with a delivery error.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, events: &[EventEnvelope]) -> Result<(), PublishError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::Delivery {
                topic: "orders.*".to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let mut published = self.published.write().await;
        for event in events {
            published.push(event.clone());
            self.marks.advance(event.aggregate_id, event.version).await;
        }
        Ok(())
    }
}
