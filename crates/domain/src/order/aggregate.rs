//! Order aggregate implementation.

use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    CustomerId, Money, OrderError, OrderEvent, OrderItem, OrderStatus,
    events::{OrderCancelledData, OrderCreatedData, OrderPaidData, OrderShippedData},
};

/// Order aggregate root.
///
/// State is the fold of the order's event history. Command methods validate
/// against current state and record new events into the uncommitted buffer;
/// they never touch storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    /// Version of the last applied event; `Version::none()` pre-creation.
    #[serde(default)]
    version: Version,

    customer_id: Option<CustomerId>,
    status: OrderStatus,
    items: Vec<OrderItem>,
    total_amount: Money,
    shipping_address: String,
    payment_id: Option<String>,
    payment_method: Option<String>,
    shipment_id: Option<String>,
    tracking_number: Option<String>,

    /// Events recorded since load, not yet appended.
    #[serde(skip)]
    uncommitted: Vec<OrderEvent>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn apply_committed(&mut self, event: Self::Event, version: Version) {
        self.apply(&event);
        self.version = version;
    }

    fn take_uncommitted(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.uncommitted)
    }
}

// Query methods
impl Order {
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    pub fn shipment_id(&self) -> Option<&str> {
        self.shipment_id.as_deref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn uncommitted(&self) -> &[OrderEvent] {
        &self.uncommitted
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Command methods
impl Order {
    /// Creates the order with its full, fixed item list.
    ///
    /// `total_amount` is computed here and never changes afterwards.
    pub fn create(
        &mut self,
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        shipping_address: impl Into<String>,
    ) -> Result<(), OrderError> {
        if self.id.is_some() {
            return Err(OrderError::IllegalTransition {
                status: self.status,
                action: "create",
            });
        }
        if items.is_empty() {
            return Err(OrderError::invalid("order must contain at least one item"));
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::invalid(format!(
                    "item {} has zero quantity",
                    item.product_id
                )));
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::invalid(format!(
                    "item {} has a negative unit price",
                    item.product_id
                )));
            }
        }

        let total_amount = items.iter().map(OrderItem::line_total).sum();
        self.record(OrderEvent::created(
            order_id,
            customer_id,
            items,
            total_amount,
            shipping_address,
        ));
        Ok(())
    }

    /// Records payment; the paid amount must equal the order total.
    pub fn mark_paid(
        &mut self,
        payment_id: impl Into<String>,
        amount: Money,
        payment_method: impl Into<String>,
    ) -> Result<(), OrderError> {
        if self.id.is_none() || !self.status.can_pay() {
            return Err(OrderError::IllegalTransition {
                status: self.status,
                action: "pay",
            });
        }
        if amount != self.total_amount {
            return Err(OrderError::invalid(format!(
                "payment amount {amount} does not match order total {}",
                self.total_amount
            )));
        }

        self.record(OrderEvent::paid(payment_id, amount, payment_method));
        Ok(())
    }

    /// Records shipment; only a paid order can ship.
    pub fn ship(
        &mut self,
        shipment_id: impl Into<String>,
        tracking_number: impl Into<String>,
    ) -> Result<(), OrderError> {
        if self.id.is_none() || !self.status.can_ship() {
            return Err(OrderError::IllegalTransition {
                status: self.status,
                action: "ship",
            });
        }

        self.record(OrderEvent::shipped(shipment_id, tracking_number));
        Ok(())
    }

    /// Cancels the order; a refund is required iff it was already paid.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if self.id.is_none() || !self.status.can_cancel() {
            return Err(OrderError::IllegalTransition {
                status: self.status,
                action: "cancel",
            });
        }

        let refund_required = self.status == OrderStatus::Paid;
        self.record(OrderEvent::cancelled(reason, refund_required));
        Ok(())
    }

    /// Applies and buffers a freshly produced event.
    fn record(&mut self, event: OrderEvent) {
        self.apply(&event);
        self.version = self.version.next();
        self.uncommitted.push(event);
    }

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::Created(data) => self.apply_created(data),
            OrderEvent::Paid(data) => self.apply_paid(data),
            OrderEvent::Shipped(data) => self.apply_shipped(data),
            OrderEvent::Cancelled(data) => self.apply_cancelled(data),
        }
    }

    fn apply_created(&mut self, data: &OrderCreatedData) {
        self.id = Some(data.order_id);
        self.customer_id = Some(data.customer_id);
        self.items = data.items.clone();
        self.total_amount = data.total_amount;
        self.shipping_address = data.shipping_address.clone();
        self.status = OrderStatus::Created;
    }

    fn apply_paid(&mut self, data: &OrderPaidData) {
        self.status = OrderStatus::Paid;
        self.payment_id = Some(data.payment_id.clone());
        self.payment_method = Some(data.payment_method.clone());
    }

    fn apply_shipped(&mut self, data: &OrderShippedData) {
        self.status = OrderStatus::Shipped;
        self.shipment_id = Some(data.shipment_id.clone());
        self.tracking_number = Some(data.tracking_number.clone());
    }

    fn apply_cancelled(&mut self, _data: &OrderCancelledData) {
        self.status = OrderStatus::Cancelled;
    }
}
