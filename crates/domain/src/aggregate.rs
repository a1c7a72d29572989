//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A domain event: an immutable fact, named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// The kind discriminator, persisted next to the payload and used to
    /// derive the publication topic.
    fn kind(&self) -> &'static str;
}

/// A replayed history broke the dense-version invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayError {
    pub expected: Version,
    pub found: Version,
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "non-dense event history: expected version {}, found {}",
            self.expected, self.found
        )
    }
}

impl std::error::Error for ReplayError {}

/// An event-sourced entity: state is the fold of its event history.
///
/// Command methods on the concrete type mutate the aggregate by recording
/// events into an uncommitted buffer; the command handler drains that
/// buffer, appends, and publishes. `apply_committed` must be pure and
/// deterministic.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;
    type Error: std::error::Error + Send + Sync;

    fn aggregate_type() -> &'static str;

    /// `None` until the creation event has been applied.
    fn id(&self) -> Option<AggregateId>;

    /// Version of the last applied event; `Version::none()` before any.
    fn version(&self) -> Version;

    /// Applies an already-persisted event, adopting its version.
    fn apply_committed(&mut self, event: Self::Event, version: Version);

    /// Drains the events recorded since load, oldest first.
    fn take_uncommitted(&mut self) -> Vec<Self::Event>;

    /// Folds a committed history into the aggregate, enforcing that
    /// versions are dense and monotonic from the current position.
    fn replay(
        &mut self,
        history: impl IntoIterator<Item = (Self::Event, Version)>,
    ) -> Result<(), ReplayError> {
        for (event, version) in history {
            let expected = self.version().next();
            if version != expected {
                return Err(ReplayError {
                    expected,
                    found: version,
                });
            }
            self.apply_committed(event, version);
        }
        Ok(())
    }
}
