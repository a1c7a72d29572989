//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{
    EventEnvelope, EventStore, EventStoreError, EventStoreExt, Snapshot, Version,
};
use publisher::{EventPublisher, RetryPolicy};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// A command targets exactly one aggregate.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn aggregate_id(&self) -> AggregateId;
}

/// Outcome of a successfully handled command.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after the new events.
    pub aggregate: A,

    /// The envelopes that were appended and published, version-ordered.
    pub events: Vec<EventEnvelope>,

    /// Aggregate version after the command.
    pub new_version: Version,
}

/// Loads, invokes, appends, publishes.
///
/// Safety against concurrent writers comes entirely from the store's
/// conditional append: the expected version is captured before the domain
/// call, and a conflict triggers a bounded reload-and-reinvoke retry. The
/// publish step runs only after the append committed, so no subscriber
/// ever sees an event that is not durable.
pub struct CommandHandler<S, P, A>
where
    S: EventStore,
    P: EventPublisher,
    A: Aggregate,
{
    store: S,
    publisher: P,
    retry: RetryPolicy,
    snapshot_every: i64,
    _phantom: PhantomData<A>,
}

impl<S, P, A> CommandHandler<S, P, A>
where
    S: EventStore,
    P: EventPublisher,
    A: Aggregate,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            retry: RetryPolicy::default(),
            snapshot_every: 50,
            _phantom: PhantomData,
        }
    }

    /// Retry policy for concurrency conflicts. `RetryPolicy::none()`
    /// surfaces the first conflict directly.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Snapshot period in events; non-positive disables snapshotting.
    pub fn with_snapshot_every(mut self, snapshot_every: i64) -> Self {
        self.snapshot_every = snapshot_every;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuilds an aggregate from its snapshot (if usable) and event tail.
    /// Yields the default instance when no events exist.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError>
    where
        A: DeserializeOwned,
    {
        let (snapshot, envelopes) = self.store.load_for_replay(aggregate_id).await?;

        let mut aggregate = match snapshot {
            Some(snapshot) => snapshot.into_state::<A>()?,
            None => A::default(),
        };

        for envelope in envelopes {
            let version = envelope.version;
            let event: A::Event = envelope.decode()?;
            let expected = aggregate.version().next();
            if version != expected {
                return Err(DomainError::CorruptStream {
                    aggregate_id,
                    expected,
                    found: version,
                });
            }
            aggregate.apply_committed(event, version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, `None` when it has no events.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError>
    where
        A: DeserializeOwned,
    {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Handles a creation command: the aggregate must not exist yet
    /// (enforced by the store's expected-version check at `none`).
    pub async fn execute_new<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A: Serialize + DeserializeOwned,
        F: Fn(&mut A) -> Result<(), A::Error>,
        DomainError: From<A::Error>,
    {
        self.run(aggregate_id, command_fn, false).await
    }

    /// Handles an update command: fails `NotFound` when the aggregate has
    /// no events.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A: Serialize + DeserializeOwned,
        F: Fn(&mut A) -> Result<(), A::Error>,
        DomainError: From<A::Error>,
    {
        self.run(aggregate_id, command_fn, true).await
    }

    async fn run<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
        require_existing: bool,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A: Serialize + DeserializeOwned,
        F: Fn(&mut A) -> Result<(), A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 0;
        loop {
            let mut aggregate = self.load(aggregate_id).await?;
            if require_existing && aggregate.id().is_none() {
                return Err(DomainError::NotFound {
                    aggregate_type: A::aggregate_type(),
                    aggregate_id,
                });
            }

            // Captured before the domain call; this is the append predicate.
            let expected_version = aggregate.version();

            command_fn(&mut aggregate)?;

            let events = aggregate.take_uncommitted();
            if events.is_empty() {
                return Ok(CommandResult {
                    aggregate,
                    events: vec![],
                    new_version: expected_version,
                });
            }

            let envelopes = build_envelopes(aggregate_id, expected_version, &events)?;

            match self.store.append(envelopes.clone(), expected_version).await {
                Ok(new_version) => {
                    metrics::counter!("commands_events_appended")
                        .increment(envelopes.len() as u64);

                    self.publisher.publish(&envelopes).await?;
                    self.maybe_snapshot(aggregate_id, new_version, &aggregate).await;

                    return Ok(CommandResult {
                        aggregate,
                        events: envelopes,
                        new_version,
                    });
                }
                Err(EventStoreError::ConcurrencyConflict { expected, actual, .. })
                    if attempt < self.retry.max_retries =>
                {
                    attempt += 1;
                    metrics::counter!("commands_conflict_retries").increment(1);
                    tracing::warn!(
                        %aggregate_id,
                        %expected,
                        %actual,
                        attempt,
                        "concurrency conflict, reloading and retrying"
                    );
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Persists a snapshot when the new version lands on the period.
    /// Failures are logged, never surfaced: snapshots are advisory.
    async fn maybe_snapshot(&self, aggregate_id: AggregateId, version: Version, aggregate: &A)
    where
        A: Serialize,
    {
        if self.snapshot_every <= 0 {
            return;
        }
        let v = version.as_i64();
        if v <= 0 || v % self.snapshot_every != 0 {
            return;
        }

        let snapshot = match Snapshot::from_state(aggregate_id, version, aggregate) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(%aggregate_id, error = %e, "failed to serialize snapshot");
                return;
            }
        };
        if let Err(e) = self.store.save_snapshot(snapshot).await {
            tracing::error!(%aggregate_id, error = %e, "failed to save snapshot");
        }
    }
}

fn build_envelopes<E: DomainEvent>(
    aggregate_id: AggregateId,
    expected_version: Version,
    events: &[E],
) -> Result<Vec<EventEnvelope>, DomainError> {
    let mut envelopes = Vec::with_capacity(events.len());
    let mut version = expected_version;

    for event in events {
        version = version.next();
        envelopes.push(EventEnvelope::record(
            aggregate_id,
            version,
            event.kind(),
            event,
        )?);
    }

    Ok(envelopes)
}
