use std::collections::HashMap;
use std::sync::Arc;

use event_store::{AggregateId, Version};
use tokio::sync::RwLock;

/// Per-aggregate publication high-water marks.
///
/// Process-local: after a restart the marks are empty and the next sweep
/// republishes from the start of the log, which the projector's
/// idempotence absorbs. Advancement is monotone.
#[derive(Clone, Default)]
pub struct HighWaterMarks {
    marks: Arc<RwLock<HashMap<AggregateId, Version>>>,
}

impl HighWaterMarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest published version for an aggregate, `Version::none()` if
    /// nothing was published yet.
    pub async fn get(&self, aggregate_id: AggregateId) -> Version {
        self.marks
            .read()
            .await
            .get(&aggregate_id)
            .copied()
            .unwrap_or_else(Version::none)
    }

    /// Raises the mark for an aggregate; lower versions are ignored.
    pub async fn advance(&self, aggregate_id: AggregateId, version: Version) {
        let mut marks = self.marks.write().await;
        let entry = marks.entry(aggregate_id).or_insert_with(Version::none);
        if version > *entry {
            *entry = version;
        }
    }
}
