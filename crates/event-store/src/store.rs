use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

/// A stream over stored events in insertion order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Contract of the append-only event log.
///
/// Appends are atomic and version-conditional: the caller states the version
/// it last observed (`Version::none()` for a brand-new aggregate) and the
/// append fails with [`EventStoreError::ConcurrencyConflict`] when storage
/// has moved past it.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically appends `events` to one aggregate's stream.
    ///
    /// The supplied envelopes must carry versions `expected_version + 1,
    /// + 2, …`, contiguous; any storage-level unique-key violation on
    /// `(aggregate_id, version)` also reports a conflict. Returns the new
    /// last version on success.
    async fn append(&self, events: Vec<EventEnvelope>, expected_version: Version)
    -> Result<Version>;

    /// Full history of one aggregate, version ascending.
    async fn load_events(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// History from `from_version` (inclusive) on, version ascending. Used
    /// when replaying on top of a snapshot.
    async fn load_events_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// The latest stored event of one aggregate, if any.
    async fn last_event(&self, aggregate_id: AggregateId) -> Result<Option<EventEnvelope>>;

    /// Upserts the single snapshot of one aggregate.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Loads the snapshot of one aggregate, if any.
    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;

    /// Streams the whole log in insertion order. Drives the outbox sweep.
    async fn stream_all(&self) -> Result<EventStream>;
}

/// Convenience methods shared by every store implementation.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Loads what a replay needs: the current-schema snapshot (if any) and
    /// the events past it, or the full history when no usable snapshot
    /// exists.
    async fn load_for_replay(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        match self.load_snapshot(aggregate_id).await? {
            Some(snapshot) if snapshot.is_current_schema() => {
                let events = self
                    .load_events_from(aggregate_id, snapshot.version.next())
                    .await?;
                Ok((Some(snapshot), events))
            }
            _ => Ok((None, self.load_events(aggregate_id).await?)),
        }
    }

    /// Current last version of an aggregate, `Version::none()` if absent.
    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Version> {
        Ok(self
            .last_event(aggregate_id)
            .await?
            .map(|e| e.version)
            .unwrap_or_else(Version::none))
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks the append contract before storage is touched: non-empty batch,
/// single aggregate, versions contiguous from `expected_version + 1`.
pub fn validate_append(events: &[EventEnvelope], expected_version: Version) -> Result<()> {
    let first = events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("empty event batch".to_string()))?;

    let mut want = expected_version.next();
    for event in events {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must target one aggregate".to_string(),
            ));
        }
        if event.version != want {
            return Err(EventStoreError::InvalidAppend(format!(
                "non-contiguous versions: expected {want}, got {}",
                event.version
            )));
        }
        want = want.next();
    }

    Ok(())
}
