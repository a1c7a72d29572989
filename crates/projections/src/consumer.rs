//! Kafka consumer loop feeding the projection.

use std::time::Duration;

use event_store::EventEnvelope;
use publisher::{DEAD_LETTER_TOPIC, ORDER_TOPICS, RetryPolicy};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio::sync::watch;

use crate::projection::{ApplyOutcome, OrderProjection};
use crate::read_model::ReadModelStore;
use crate::{ProjectionError, Result};

/// Tails the `orders.*` topics and applies each event to the read model.
///
/// Offsets are committed only after the read-model transaction commits;
/// parked events keep their offset uncommitted so a restart redelivers
/// them. Undecodable messages go to the dead-letter topic and their offset
/// is skipped. Transient read-model errors retry with backoff, without
/// committing, for as long as the consumer runs.
pub struct ProjectionConsumer<R> {
    consumer: StreamConsumer,
    dead_letters: FutureProducer,
    projection: OrderProjection<R>,
    backoff: RetryPolicy,
}

impl<R> std::fmt::Debug for ProjectionConsumer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionConsumer").finish_non_exhaustive()
    }
}

impl<R: ReadModelStore> ProjectionConsumer<R> {
    pub fn builder() -> ProjectionConsumerBuilder {
        ProjectionConsumerBuilder::default()
    }

    pub fn projection(&self) -> &OrderProjection<R> {
        &self.projection
    }

    /// Consumes until `shutdown` flips true (or its sender is dropped).
    /// Returns only on shutdown or a fail-hard projection error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if shutdown_requested(&shutdown) {
                tracing::info!("projection consumer shutting down");
                return Ok(());
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("projection consumer shutting down");
                        return Ok(());
                    }
                }
                received = self.consumer.recv() => match received {
                    Ok(message) => self.process(&message, &mut shutdown).await?,
                    Err(e) => {
                        tracing::error!(error = %e, "consumer receive error");
                        sleep_or_shutdown(self.backoff.initial_delay, &mut shutdown).await;
                    }
                },
            }
        }
    }

    async fn process(
        &self,
        message: &BorrowedMessage<'_>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let payload = message.payload().unwrap_or_default();

        let envelope: EventEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %e,
                    "poison message, routing to dead letter"
                );
                return self.dead_letter(message).await;
            }
        };

        let mut attempt = 0;
        loop {
            if shutdown_requested(shutdown) {
                tracing::info!(
                    aggregate_id = %envelope.aggregate_id,
                    "shutdown during transient retry, offset left uncommitted"
                );
                return Ok(());
            }

            match self.projection.handle(&envelope).await {
                Ok(outcome) => {
                    if outcome.is_ack() {
                        self.commit(message)?;
                    }
                    if outcome == ApplyOutcome::Parked {
                        tracing::debug!(
                            topic = message.topic(),
                            offset = message.offset(),
                            "event parked, offset left uncommitted"
                        );
                    }
                    return Ok(());
                }
                // The envelope parsed but its event payload did not.
                Err(ProjectionError::Decode(e)) => {
                    tracing::error!(
                        aggregate_id = %envelope.aggregate_id,
                        version = %envelope.version,
                        error = %e,
                        "undecodable event, routing to dead letter"
                    );
                    return self.dead_letter(message).await;
                }
                Err(e @ ProjectionError::ParkedOverflow { .. }) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    metrics::counter!("projection_transient_retries").increment(1);
                    tracing::warn!(
                        aggregate_id = %envelope.aggregate_id,
                        attempt,
                        error = %e,
                        "transient projection error, retrying without commit"
                    );
                    sleep_or_shutdown(self.backoff.delay_for_attempt(attempt), shutdown).await;
                }
            }
        }
    }

    /// Forwards the raw message to the dead-letter topic, then commits its
    /// offset so the poison message is skipped.
    async fn dead_letter(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let key = message.key().unwrap_or_default();
        let payload = message.payload().unwrap_or_default();
        let record = FutureRecord::to(DEAD_LETTER_TOPIC).key(key).payload(payload);

        self.dead_letters
            .send(record, Timeout::After(Duration::from_secs(5)))
            .await
            .map_err(|(e, _)| {
                ProjectionError::Consumer(format!("dead-letter publish failed: {e}"))
            })?;

        metrics::counter!("projection_events_dead_lettered").increment(1);
        self.commit(message)
    }

    fn commit(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        self.consumer
            .commit_message(message, CommitMode::Async)
            .map_err(|e| ProjectionError::Consumer(format!("offset commit failed: {e}")))
    }
}

/// A dropped sender counts as shutdown: nothing can flip the flag anymore.
fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Sleeps for `delay` unless shutdown is requested first.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}

/// Builder for [`ProjectionConsumer`].
#[derive(Default)]
pub struct ProjectionConsumerBuilder {
    bootstrap: Option<String>,
    group_id: Option<String>,
    backoff: Option<RetryPolicy>,
}

impl ProjectionConsumerBuilder {
    pub fn bootstrap(mut self, bootstrap: impl Into<String>) -> Self {
        self.bootstrap = Some(bootstrap.into());
        self
    }

    /// Consumer group id; defaults to `order-projections`.
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn build<R: ReadModelStore>(
        self,
        projection: OrderProjection<R>,
    ) -> Result<ProjectionConsumer<R>> {
        let bootstrap = self
            .bootstrap
            .ok_or_else(|| ProjectionError::Consumer("bootstrap servers not set".to_string()))?;
        let group_id = self
            .group_id
            .unwrap_or_else(|| "order-projections".to_string());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| ProjectionError::Consumer(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&ORDER_TOPICS)
            .map_err(|e| ProjectionError::Consumer(format!("failed to subscribe: {e}")))?;

        let dead_letters: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| {
                ProjectionError::Consumer(format!("failed to create dead-letter producer: {e}"))
            })?;

        tracing::info!(%bootstrap, %group_id, topics = ?ORDER_TOPICS, "projection consumer ready");

        Ok(ProjectionConsumer {
            consumer,
            dead_letters,
            projection,
            backoff: self.backoff.unwrap_or_default(),
        })
    }
}
