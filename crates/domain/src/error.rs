//! Errors surfaced by the write side.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use publisher::PublishError;
use thiserror::Error;

use crate::order::OrderError;

/// Errors a command can come back with.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The domain rejected the command (invalid input or illegal
    /// transition). Surfaced as-is, never retried.
    #[error(transparent)]
    Order(OrderError),

    /// An update command targeted an aggregate with no events.
    #[error("{aggregate_type} {aggregate_id} not found")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// A loaded history violated the dense-version invariant. Operational
    /// alert material: storage handed back something impossible.
    #[error(
        "corrupt event stream for {aggregate_id}: expected version {expected}, found {found}"
    )]
    CorruptStream {
        aggregate_id: AggregateId,
        expected: Version,
        found: Version,
    },

    /// The event store refused or failed the operation. Conflicts land
    /// here once the bounded retry is exhausted.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The append succeeded but publication did not: the store is ahead of
    /// the topic log until the outbox sweep republishes.
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        DomainError::Order(e)
    }
}
