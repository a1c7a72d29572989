//! The idempotence / ordering engine of the projector.

use std::collections::{BTreeMap, HashMap};

use common::AggregateId;
use domain::OrderEvent;
use event_store::{EventEnvelope, Version};
use tokio::sync::Mutex;

use crate::read_model::{OrderItemRow, OrderMutation, OrderRow, ReadModelStore};
use crate::{ProjectionError, Result};

/// Default bound on parked events per aggregate.
const DEFAULT_MAX_PARKED: usize = 128;

/// What the projection did with a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event (and `drained` parked successors) hit the read model.
    Applied { drained: usize },

    /// Version at or below the last applied one; ignored.
    Duplicate,

    /// Version beyond the next expected one; held until the gap closes.
    /// The caller must not acknowledge the offset.
    Parked,
}

impl ApplyOutcome {
    /// True when the caller may acknowledge the event's offset.
    pub fn is_ack(&self) -> bool {
        !matches!(self, ApplyOutcome::Parked)
    }
}

/// Applies order events to a read model exactly once, in version order.
///
/// Deliveries may be duplicated, out of order, or ahead of their
/// `Created` event (the four kinds flow on distinct topics). The engine
/// keys everything on `(aggregate_id, version)`:
/// version `<=` last applied is a duplicate, `== last + 1` applies and
/// drains any parked successors, anything further parks in a bounded
/// per-aggregate buffer.
pub struct OrderProjection<R> {
    store: R,
    parked: Mutex<HashMap<AggregateId, BTreeMap<i64, EventEnvelope>>>,
    max_parked: usize,
}

impl<R: ReadModelStore> OrderProjection<R> {
    pub fn new(store: R) -> Self {
        Self {
            store,
            parked: Mutex::new(HashMap::new()),
            max_parked: DEFAULT_MAX_PARKED,
        }
    }

    /// Overrides the per-aggregate parked-event bound.
    pub fn with_max_parked(mut self, max_parked: usize) -> Self {
        self.max_parked = max_parked;
        self
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    /// Total parked events across all aggregates.
    pub async fn parked_count(&self) -> usize {
        self.parked.lock().await.values().map(BTreeMap::len).sum()
    }

    /// Processes one delivered envelope.
    #[tracing::instrument(
        skip(self, envelope),
        fields(aggregate_id = %envelope.aggregate_id, version = %envelope.version)
    )]
    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<ApplyOutcome> {
        // Decode up front: a poison payload must surface here, not hide in
        // the park buffer until its predecessor arrives.
        let event: OrderEvent = envelope.decode()?;

        let aggregate_id = envelope.aggregate_id;
        let last = self.store.last_applied_version(aggregate_id).await?;
        let expected = last.map(|v| v.next()).unwrap_or_else(Version::first);

        if let Some(last) = last
            && envelope.version <= last
        {
            metrics::counter!("projection_events_duplicate").increment(1);
            tracing::debug!("duplicate event ignored");
            return Ok(ApplyOutcome::Duplicate);
        }

        if envelope.version != expected {
            return self.park(envelope.clone()).await.map(|()| {
                metrics::counter!("projection_events_parked").increment(1);
                tracing::debug!(expected = %expected, "event parked, predecessor missing");
                ApplyOutcome::Parked
            });
        }

        self.apply(envelope, event).await?;
        let drained = self.drain_parked(aggregate_id, envelope.version).await?;
        Ok(ApplyOutcome::Applied { drained })
    }

    async fn park(&self, envelope: EventEnvelope) -> Result<()> {
        let mut parked = self.parked.lock().await;
        let buffer = parked.entry(envelope.aggregate_id).or_default();

        if buffer.len() >= self.max_parked
            && !buffer.contains_key(&envelope.version.as_i64())
        {
            return Err(ProjectionError::ParkedOverflow {
                aggregate_id: envelope.aggregate_id,
                limit: self.max_parked,
            });
        }

        buffer.insert(envelope.version.as_i64(), envelope);
        Ok(())
    }

    /// Applies buffered successors of `applied` while they stay contiguous.
    async fn drain_parked(&self, aggregate_id: AggregateId, applied: Version) -> Result<usize> {
        let mut drained = 0;
        let mut next = applied.next();

        loop {
            let candidate = {
                let mut parked = self.parked.lock().await;
                let Some(buffer) = parked.get_mut(&aggregate_id) else {
                    break;
                };
                let candidate = buffer.remove(&next.as_i64());
                if buffer.is_empty() {
                    parked.remove(&aggregate_id);
                }
                candidate
            };

            let Some(envelope) = candidate else { break };
            let event: OrderEvent = envelope.decode()?;
            self.apply(&envelope, event).await?;
            drained += 1;
            next = next.next();
        }

        Ok(drained)
    }

    async fn apply(&self, envelope: &EventEnvelope, event: OrderEvent) -> Result<()> {
        let mutation = mutation_for(envelope, event);
        self.store.apply(mutation).await?;
        metrics::counter!("projection_events_applied").increment(1);
        Ok(())
    }
}

/// Translates one event into its read-model effect.
fn mutation_for(envelope: &EventEnvelope, event: OrderEvent) -> OrderMutation {
    let order_id = envelope.aggregate_id;
    let version = envelope.version;
    let timestamp = envelope.timestamp;

    match event {
        OrderEvent::Created(data) => OrderMutation::Insert {
            order: OrderRow {
                id: order_id,
                customer_id: data.customer_id,
                total_amount: data.total_amount,
                shipping_address: data.shipping_address,
                status: domain::OrderStatus::Created,
                version,
                created_at: timestamp,
                updated_at: timestamp,
                payment_id: None,
                payment_method: None,
                shipment_id: None,
                tracking_number: None,
            },
            items: data
                .items
                .into_iter()
                .map(|item| OrderItemRow {
                    order_id,
                    product_id: item.product_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
        },
        OrderEvent::Paid(data) => OrderMutation::SetPaid {
            order_id,
            version,
            timestamp,
            payment_id: data.payment_id,
            payment_method: data.payment_method,
        },
        OrderEvent::Shipped(data) => OrderMutation::SetShipped {
            order_id,
            version,
            timestamp,
            shipment_id: data.shipment_id,
            tracking_number: data.tracking_number,
        },
        OrderEvent::Cancelled(data) => OrderMutation::SetCancelled {
            order_id,
            version,
            timestamp,
            reason: data.reason,
        },
    }
}
