use std::time::Duration;

use async_trait::async_trait;
use event_store::EventEnvelope;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use crate::marks::HighWaterMarks;
use crate::retry::RetryPolicy;
use crate::topics::topic_for_event;
use crate::{EventPublisher, PublishError};

/// Kafka-backed event publisher.
///
/// Each envelope goes to `orders.<kind-lowercase>` keyed by the aggregate
/// id string, so all events of one aggregate share a partition and keep
/// their storage order on the wire. Delivery is at-least-once: transient
/// send errors retry per the bounded policy, hard failures surface to the
/// caller and leave the store ahead of the log until the sweeper catches
/// up.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    retry: RetryPolicy,
    marks: HighWaterMarks,
    timeout: Duration,
}

impl std::fmt::Debug for KafkaEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventPublisher").finish_non_exhaustive()
    }
}

impl KafkaEventPublisher {
    pub fn builder() -> KafkaEventPublisherBuilder {
        KafkaEventPublisherBuilder::default()
    }

    /// The publication high-water marks this producer advances.
    pub fn marks(&self) -> HighWaterMarks {
        self.marks.clone()
    }

    /// Flushes any in-flight deliveries; call on shutdown.
    pub fn drain(&self, timeout: Duration) -> Result<(), PublishError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| PublishError::Delivery {
                topic: "*".to_string(),
                reason: format!("flush failed: {e}"),
            })
    }

    async fn publish_one(&self, event: &EventEnvelope) -> Result<(), PublishError> {
        let topic = topic_for_event(&event.event_type);
        let key = event.aggregate_id.to_string();
        let payload = serde_json::to_vec(event)?;

        let mut attempt = 0;
        loop {
            let record = FutureRecord::to(&topic).key(&key).payload(&payload);
            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        %topic,
                        partition,
                        offset,
                        aggregate_id = %event.aggregate_id,
                        version = %event.version,
                        "event published"
                    );
                    metrics::counter!("publisher_events_published").increment(1);
                    return Ok(());
                }
                Err((err, _)) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    metrics::counter!("publisher_publish_retries").increment(1);
                    tracing::warn!(
                        %topic,
                        attempt,
                        error = %err,
                        "publish failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                Err((err, _)) => {
                    tracing::error!(%topic, error = %err, "publish failed after retries");
                    return Err(PublishError::Delivery {
                        topic,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, events: &[EventEnvelope]) -> Result<(), PublishError> {
        for event in events {
            self.publish_one(event).await?;
            self.marks.advance(event.aggregate_id, event.version).await;
        }
        Ok(())
    }
}

/// Builder for [`KafkaEventPublisher`].
#[derive(Default)]
pub struct KafkaEventPublisherBuilder {
    bootstrap: Option<String>,
    client_id: Option<String>,
    retry: Option<RetryPolicy>,
    marks: Option<HighWaterMarks>,
    timeout: Option<Duration>,
}

impl KafkaEventPublisherBuilder {
    /// Comma-separated broker addresses.
    pub fn bootstrap(mut self, bootstrap: impl Into<String>) -> Self {
        self.bootstrap = Some(bootstrap.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Shares an existing mark set (so the sweeper can read it).
    pub fn marks(mut self, marks: HighWaterMarks) -> Self {
        self.marks = Some(marks);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<KafkaEventPublisher, PublishError> {
        let bootstrap = self
            .bootstrap
            .ok_or_else(|| PublishError::Config("bootstrap servers not set".to_string()))?;

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &bootstrap)
            .set("client.id", self.client_id.as_deref().unwrap_or("order-service"))
            .set("acks", "all")
            .set("message.timeout.ms", "5000");

        let producer: FutureProducer = config
            .create()
            .map_err(|e| PublishError::Config(format!("failed to create producer: {e}")))?;

        tracing::info!(%bootstrap, "kafka event publisher ready");

        Ok(KafkaEventPublisher {
            producer,
            retry: self.retry.unwrap_or_default(),
            marks: self.marks.unwrap_or_default(),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KafkaEventPublisher>();
    }

    #[test]
    fn builder_requires_bootstrap() {
        let err = KafkaEventPublisher::builder().build().unwrap_err();
        assert!(matches!(err, PublishError::Config(_)));
    }
}
