use thiserror::Error;

/// Errors surfaced by event publication.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Delivery failed after the bounded retry policy was exhausted.
    #[error("failed to deliver to topic {topic}: {reason}")]
    Delivery { topic: String, reason: String },

    /// The producer could not be constructed.
    #[error("producer configuration error: {0}")]
    Config(String),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the outbox sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("event store error during sweep: {0}")]
    Store(#[from] event_store::EventStoreError),

    #[error("republish error during sweep: {0}")]
    Publish(#[from] PublishError),
}
