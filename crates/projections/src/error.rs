use common::AggregateId;
use thiserror::Error;

/// Errors surfaced while projecting events into the read model.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The payload does not decode into a known event. Poison: the message
    /// is routed to the dead-letter topic and its offset skipped.
    #[error("undecodable event payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The read-model database failed. Transient: retried with backoff,
    /// the offset stays uncommitted.
    #[error("read model error: {0}")]
    Store(#[from] sqlx::Error),

    /// The per-aggregate holding buffer hit its bound; a predecessor event
    /// has been missing for too long. Fail-hard.
    #[error("parked-event buffer overflow for aggregate {aggregate_id} (limit {limit})")]
    ParkedOverflow {
        aggregate_id: AggregateId,
        limit: usize,
    },

    /// The log consumer itself failed (subscription, commit, dead-letter
    /// routing).
    #[error("consumer error: {0}")]
    Consumer(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
