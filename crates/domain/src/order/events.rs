//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{CustomerId, Money, OrderItem};

/// The closed set of facts an order can record.
///
/// The tag is the kind discriminator persisted next to the payload and
/// lowercased into the publication topic name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order came into existence with its full, fixed item list.
    Created(OrderCreatedData),

    /// Payment matching the order total was received.
    Paid(OrderPaidData),

    /// Order was handed to the carrier.
    Shipped(OrderShippedData),

    /// Order was cancelled before shipment.
    Cancelled(OrderCancelledData),
}

impl DomainEvent for OrderEvent {
    fn kind(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "Created",
            OrderEvent::Paid(_) => "Paid",
            OrderEvent::Shipped(_) => "Shipped",
            OrderEvent::Cancelled(_) => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub shipping_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaidData {
    pub payment_id: String,
    pub amount_paid: Money,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderShippedData {
    pub shipment_id: String,
    pub tracking_number: String,
    pub shipped_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    /// True when the order had already been paid at cancellation time.
    pub refund_required: bool,
}

impl OrderEvent {
    pub fn created(
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        total_amount: Money,
        shipping_address: impl Into<String>,
    ) -> Self {
        OrderEvent::Created(OrderCreatedData {
            order_id,
            customer_id,
            items,
            total_amount,
            shipping_address: shipping_address.into(),
        })
    }

    pub fn paid(
        payment_id: impl Into<String>,
        amount_paid: Money,
        payment_method: impl Into<String>,
    ) -> Self {
        OrderEvent::Paid(OrderPaidData {
            payment_id: payment_id.into(),
            amount_paid,
            payment_method: payment_method.into(),
        })
    }

    pub fn shipped(shipment_id: impl Into<String>, tracking_number: impl Into<String>) -> Self {
        OrderEvent::Shipped(OrderShippedData {
            shipment_id: shipment_id.into(),
            tracking_number: tracking_number.into(),
            shipped_date: Utc::now(),
        })
    }

    pub fn cancelled(reason: impl Into<String>, refund_required: bool) -> Self {
        OrderEvent::Cancelled(OrderCancelledData {
            reason: reason.into(),
            refund_required,
        })
    }
}
