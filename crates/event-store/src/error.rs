use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors surfaced by event store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The version predicate on an append did not hold. Two racing writers
    /// against the same aggregate resolve here: exactly one wins.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The supplied batch violates the append contract (empty, mixed
    /// aggregates, or non-contiguous versions).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
