use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, validate_append},
};

/// In-memory event store.
///
/// Backs unit and integration tests with the same contract as the
/// PostgreSQL implementation, including the conditional-append semantics:
/// the version check and the insert happen under one write lock, so two
/// racing appends with the same expected version resolve to exactly one
/// winner.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events, across all aggregates.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version> {
        validate_append(&events, expected_version)?;
        let aggregate_id = events[0].aggregate_id;

        let mut store = self.events.write().await;

        let actual = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or_else(Version::none);

        if actual != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        // The version check above is the unique (aggregate_id, version)
        // constraint: validated batches start at actual + 1, so nothing
        // past this point can collide with a stored version.
        let last_version = events.last().map(|e| e.version).unwrap_or(actual);
        store.extend(events);
        Ok(last_version)
    }

    async fn load_events(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn load_events_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn last_event(&self, aggregate_id: AggregateId) -> Result<Option<EventEnvelope>> {
        let store = self.events.read().await;
        Ok(store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .max_by_key(|e| e.version)
            .cloned())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(&aggregate_id).cloned())
    }

    async fn stream_all(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.events.read().await.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStoreExt;

    fn envelope(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::record(
            aggregate_id,
            Version::new(version),
            event_type,
            &serde_json::json!({"v": version}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn append_new_aggregate() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let last = store
            .append(vec![envelope(id, 0, "Created")], Version::none())
            .await
            .unwrap();

        assert_eq!(last, Version::first());
        assert_eq!(store.load_events(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_batch_returns_last_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let events = vec![
            envelope(id, 0, "Created"),
            envelope(id, 1, "Paid"),
            envelope(id, 2, "Shipped"),
        ];
        let last = store.append(events, Version::none()).await.unwrap();
        assert_eq!(last, Version::new(2));
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![envelope(id, 0, "Created")], Version::none())
            .await
            .unwrap();

        let err = store
            .append(vec![envelope(id, 6, "Paid")], Version::new(5))
            .await
            .unwrap_err();

        assert!(matches!(err, EventStoreError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn expecting_new_on_existing_aggregate_conflicts() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![envelope(id, 0, "Created")], Version::none())
            .await
            .unwrap();

        let err = store
            .append(vec![envelope(id, 0, "Created")], Version::none())
            .await
            .unwrap_err();

        assert!(matches!(err, EventStoreError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn exactly_one_of_two_racing_appends_wins() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![envelope(id, 0, "Created")], Version::none())
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            store.append(vec![envelope(id, 1, "Paid")], Version::first()),
            store.append(vec![envelope(id, 1, "Paid")], Version::first()),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let events = store.load_events(id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].version, Version::new(1));
    }

    #[tokio::test]
    async fn load_events_from_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let events = vec![
            envelope(id, 0, "Created"),
            envelope(id, 1, "Paid"),
            envelope(id, 2, "Shipped"),
        ];
        store.append(events, Version::none()).await.unwrap();

        let tail = store.load_events_from(id, Version::new(1)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].version, Version::new(1));
    }

    #[tokio::test]
    async fn last_event_and_current_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        assert!(store.last_event(id).await.unwrap().is_none());
        assert_eq!(store.current_version(id).await.unwrap(), Version::none());

        store
            .append(
                vec![envelope(id, 0, "Created"), envelope(id, 1, "Paid")],
                Version::none(),
            )
            .await
            .unwrap();

        let last = store.last_event(id).await.unwrap().unwrap();
        assert_eq!(last.version, Version::new(1));
        assert_eq!(store.current_version(id).await.unwrap(), Version::new(1));
    }

    #[tokio::test]
    async fn snapshot_upsert_and_load() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let first = Snapshot::from_state(id, Version::new(2), &serde_json::json!({"n": 1})).unwrap();
        store.save_snapshot(first).await.unwrap();

        let second =
            Snapshot::from_state(id, Version::new(4), &serde_json::json!({"n": 2})).unwrap();
        store.save_snapshot(second).await.unwrap();

        let loaded = store.load_snapshot(id).await.unwrap().unwrap();
        assert_eq!(loaded.version, Version::new(4));
    }

    #[tokio::test]
    async fn load_for_replay_skips_stale_schema_snapshot() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(
                vec![envelope(id, 0, "Created"), envelope(id, 1, "Paid")],
                Version::none(),
            )
            .await
            .unwrap();

        let mut snapshot =
            Snapshot::from_state(id, Version::first(), &serde_json::json!({})).unwrap();
        snapshot.schema_version = 0;
        store.save_snapshot(snapshot).await.unwrap();

        let (snapshot, events) = store.load_for_replay(id).await.unwrap();
        assert!(snapshot.is_none());
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn load_for_replay_returns_tail_after_snapshot() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(
                vec![envelope(id, 0, "Created"), envelope(id, 1, "Paid")],
                Version::none(),
            )
            .await
            .unwrap();
        store
            .save_snapshot(
                Snapshot::from_state(id, Version::first(), &serde_json::json!({})).unwrap(),
            )
            .await
            .unwrap();

        let (snapshot, events) = store.load_for_replay(id).await.unwrap();
        assert_eq!(snapshot.unwrap().version, Version::first());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version, Version::new(1));
    }

    #[tokio::test]
    async fn stream_all_yields_insertion_order() {
        use futures_util::StreamExt;

        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        store
            .append(vec![envelope(a, 0, "Created")], Version::none())
            .await
            .unwrap();
        store
            .append(vec![envelope(b, 0, "Created")], Version::none())
            .await
            .unwrap();
        store
            .append(vec![envelope(a, 1, "Paid")], Version::first())
            .await
            .unwrap();

        let stream = store.stream_all().await.unwrap();
        let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].aggregate_id, a);
        assert_eq!(events[1].aggregate_id, b);
        assert_eq!(events[2].version, Version::new(1));
    }
}
