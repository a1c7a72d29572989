use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, Version};

/// Current snapshot state format. Bump when the serialized aggregate shape
/// changes; loaders skip snapshots with an unknown schema and fall back to
/// full replay.
pub const SNAPSHOT_SCHEMA_VERSION: i32 = 1;

/// A cached materialization of aggregate state at a specific version.
///
/// Advisory only: the event stream stays authoritative, and at most one
/// snapshot exists per aggregate (newer ones replace older ones).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub schema_version: i32,
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Builds a snapshot from a serializable aggregate state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id,
            version,
            timestamp: Utc::now(),
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            state: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the snapshot back into aggregate state.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }

    /// True when this snapshot was written by the current state format.
    pub fn is_current_schema(&self) -> bool {
        self.schema_version == SNAPSHOT_SCHEMA_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct FakeState {
        balance: i64,
    }

    #[test]
    fn state_roundtrip() {
        let id = AggregateId::new();
        let snapshot =
            Snapshot::from_state(id, Version::new(7), &FakeState { balance: 42 }).unwrap();

        assert_eq!(snapshot.aggregate_id, id);
        assert_eq!(snapshot.version, Version::new(7));
        assert!(snapshot.is_current_schema());

        let state: FakeState = snapshot.into_state().unwrap();
        assert_eq!(state, FakeState { balance: 42 });
    }

    #[test]
    fn stale_schema_is_detected() {
        let mut snapshot =
            Snapshot::from_state(AggregateId::new(), Version::first(), &FakeState { balance: 0 })
                .unwrap();
        snapshot.schema_version = 0;
        assert!(!snapshot.is_current_schema());
    }
}
