//! Read-model rows, mutations, and the store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{CustomerId, Money, OrderStatus, ProductId};
use event_store::Version;

use crate::Result;

/// One row of the `orders` table. `version` is the last applied event
/// version, the idempotence key for the at-least-once stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRow {
    pub id: AggregateId,
    pub customer_id: CustomerId,
    pub total_amount: Money,
    pub shipping_address: String,
    pub status: OrderStatus,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payment_id: Option<String>,
    pub payment_method: Option<String>,
    pub shipment_id: Option<String>,
    pub tracking_number: Option<String>,
}

/// One row of `order_items`, keyed by `(order_id, product_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItemRow {
    pub order_id: AggregateId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// One row of the `order_status_history` audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusHistoryRow {
    pub order_id: AggregateId,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// The closed set of per-event read-model effects.
///
/// Every variant carries the applied event's version and timestamp; the
/// store writes the row change, the version mark, and the status-history
/// append in one transaction.
#[derive(Debug, Clone)]
pub enum OrderMutation {
    /// `Created`: order row plus its item rows.
    Insert {
        order: OrderRow,
        items: Vec<OrderItemRow>,
    },

    /// `Paid`: status, payment fields, updated_at.
    SetPaid {
        order_id: AggregateId,
        version: Version,
        timestamp: DateTime<Utc>,
        payment_id: String,
        payment_method: String,
    },

    /// `Shipped`: status, shipment fields, updated_at.
    SetShipped {
        order_id: AggregateId,
        version: Version,
        timestamp: DateTime<Utc>,
        shipment_id: String,
        tracking_number: String,
    },

    /// `Cancelled`: status, updated_at; the reason lands in the history.
    SetCancelled {
        order_id: AggregateId,
        version: Version,
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

impl OrderMutation {
    pub fn order_id(&self) -> AggregateId {
        match self {
            OrderMutation::Insert { order, .. } => order.id,
            OrderMutation::SetPaid { order_id, .. }
            | OrderMutation::SetShipped { order_id, .. }
            | OrderMutation::SetCancelled { order_id, .. } => *order_id,
        }
    }

    pub fn version(&self) -> Version {
        match self {
            OrderMutation::Insert { order, .. } => order.version,
            OrderMutation::SetPaid { version, .. }
            | OrderMutation::SetShipped { version, .. }
            | OrderMutation::SetCancelled { version, .. } => *version,
        }
    }
}

/// Transactional apply + queries over the read model.
///
/// The projection consumer is the only writer; `apply` must put the whole
/// effect of one event (row change, version mark, history append) into a
/// single transaction.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    /// Version of the last applied event for an order, `None` when the
    /// order has no row yet.
    async fn last_applied_version(&self, order_id: AggregateId) -> Result<Option<Version>>;

    /// Applies one event's effect atomically.
    async fn apply(&self, mutation: OrderMutation) -> Result<()>;

    async fn get_order(&self, order_id: AggregateId) -> Result<Option<OrderRow>>;

    async fn get_items(&self, order_id: AggregateId) -> Result<Vec<OrderItemRow>>;

    /// History rows for an order, timestamp ascending.
    async fn get_history(&self, order_id: AggregateId) -> Result<Vec<StatusHistoryRow>>;
}
