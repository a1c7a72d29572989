use std::time::Duration;

use event_store::EventStore;
use futures_util::StreamExt;
use tokio::sync::watch;

use crate::marks::HighWaterMarks;
use crate::{EventPublisher, SweepError};

/// Republishes stored events the publisher has not confirmed.
///
/// Covers the window where an append succeeded but the publish (and its
/// retries) did not: the store is ahead of the log until the next sweep
/// pushes the missing events out again. Republication is safe because the
/// projector ignores versions at or below its last applied one.
pub struct OutboxSweeper<S, P> {
    store: S,
    publisher: P,
    marks: HighWaterMarks,
}

impl<S, P> OutboxSweeper<S, P>
where
    S: EventStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P, marks: HighWaterMarks) -> Self {
        Self {
            store,
            publisher,
            marks,
        }
    }

    /// One pass over the log; returns how many events were republished.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<usize, SweepError> {
        let mut stream = self.store.stream_all().await?;
        let mut republished = 0;

        while let Some(event) = stream.next().await {
            let event = event?;
            if event.version > self.marks.get(event.aggregate_id).await {
                self.publisher
                    .publish(std::slice::from_ref(&event))
                    .await?;
                republished += 1;
                metrics::counter!("publisher_events_republished").increment(1);
            }
        }

        if republished > 0 {
            tracing::info!(republished, "outbox sweep republished events");
        }
        Ok(republished)
    }

    /// Sweeps on an interval until `shutdown` flips true. Sweep errors are
    /// logged and retried on the next tick.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "outbox sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("outbox sweeper shutting down");
                        return;
                    }
                }
            }
        }
    }
}
