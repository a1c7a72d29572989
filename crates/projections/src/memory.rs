use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::OrderStatus;
use event_store::Version;
use tokio::sync::RwLock;

use crate::Result;
use crate::read_model::{
    OrderItemRow, OrderMutation, OrderRow, ReadModelStore, StatusHistoryRow,
};

/// In-memory read model for tests.
///
/// Mirrors the relational contract: one "transaction" per mutation under a
/// single write lock, version mark included.
#[derive(Clone, Default)]
pub struct InMemoryReadModelStore {
    inner: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    orders: HashMap<AggregateId, OrderRow>,
    items: HashMap<AggregateId, Vec<OrderItemRow>>,
    history: Vec<StatusHistoryRow>,
}

impl InMemoryReadModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order_count(&self) -> usize {
        self.inner.read().await.orders.len()
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    async fn last_applied_version(&self, order_id: AggregateId) -> Result<Option<Version>> {
        Ok(self
            .inner
            .read()
            .await
            .orders
            .get(&order_id)
            .map(|o| o.version))
    }

    async fn apply(&self, mutation: OrderMutation) -> Result<()> {
        let mut tables = self.inner.write().await;

        match mutation {
            OrderMutation::Insert { order, items } => {
                tables.history.push(StatusHistoryRow {
                    order_id: order.id,
                    status: OrderStatus::Created,
                    timestamp: order.created_at,
                    reason: None,
                });
                tables.items.insert(order.id, items);
                tables.orders.insert(order.id, order);
            }
            OrderMutation::SetPaid {
                order_id,
                version,
                timestamp,
                payment_id,
                payment_method,
            } => {
                if let Some(order) = tables.orders.get_mut(&order_id) {
                    order.status = OrderStatus::Paid;
                    order.version = version;
                    order.updated_at = timestamp;
                    order.payment_id = Some(payment_id);
                    order.payment_method = Some(payment_method);
                }
                tables.history.push(StatusHistoryRow {
                    order_id,
                    status: OrderStatus::Paid,
                    timestamp,
                    reason: None,
                });
            }
            OrderMutation::SetShipped {
                order_id,
                version,
                timestamp,
                shipment_id,
                tracking_number,
            } => {
                if let Some(order) = tables.orders.get_mut(&order_id) {
                    order.status = OrderStatus::Shipped;
                    order.version = version;
                    order.updated_at = timestamp;
                    order.shipment_id = Some(shipment_id);
                    order.tracking_number = Some(tracking_number);
                }
                tables.history.push(StatusHistoryRow {
                    order_id,
                    status: OrderStatus::Shipped,
                    timestamp,
                    reason: None,
                });
            }
            OrderMutation::SetCancelled {
                order_id,
                version,
                timestamp,
                reason,
            } => {
                if let Some(order) = tables.orders.get_mut(&order_id) {
                    order.status = OrderStatus::Cancelled;
                    order.version = version;
                    order.updated_at = timestamp;
                }
                tables.history.push(StatusHistoryRow {
                    order_id,
                    status: OrderStatus::Cancelled,
                    timestamp,
                    reason: Some(reason),
                });
            }
        }

        Ok(())
    }

    async fn get_order(&self, order_id: AggregateId) -> Result<Option<OrderRow>> {
        Ok(self.inner.read().await.orders.get(&order_id).cloned())
    }

    async fn get_items(&self, order_id: AggregateId) -> Result<Vec<OrderItemRow>> {
        Ok(self
            .inner
            .read()
            .await
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_history(&self, order_id: AggregateId) -> Result<Vec<StatusHistoryRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<_> = inner
            .history
            .iter()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.timestamp);
        Ok(rows)
    }
}
