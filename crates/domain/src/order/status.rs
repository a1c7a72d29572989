//! Order status machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
///
/// ```text
/// none ──Created──► Created ──Paid──► Paid ──Shipped──► Shipped
///                      │                │
///                      └───Cancelled────┴──► Cancelled
/// ```
///
/// Shipped and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order exists, awaiting payment.
    #[default]
    Created,

    /// Payment received, awaiting shipment.
    Paid,

    /// Handed to the carrier (terminal).
    Shipped,

    /// Cancelled before shipment (terminal).
    Cancelled,
}

impl OrderStatus {
    /// True if payment is accepted in this status.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Created)
    }

    /// True if shipment is accepted in this status.
    pub fn can_ship(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    /// True if cancellation is accepted in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Created | OrderStatus::Paid)
    }

    /// True when no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(OrderStatus::Created),
            "Paid" => Ok(OrderStatus::Paid),
            "Shipped" => Ok(OrderStatus::Shipped),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_created_can_pay() {
        assert!(OrderStatus::Created.can_pay());
        assert!(!OrderStatus::Paid.can_pay());
        assert!(!OrderStatus::Shipped.can_pay());
        assert!(!OrderStatus::Cancelled.can_pay());
    }

    #[test]
    fn only_paid_can_ship() {
        assert!(!OrderStatus::Created.can_ship());
        assert!(OrderStatus::Paid.can_ship());
        assert!(!OrderStatus::Shipped.can_ship());
        assert!(!OrderStatus::Cancelled.can_ship());
    }

    #[test]
    fn terminal_statuses_cannot_cancel() {
        assert!(OrderStatus::Created.can_cancel());
        assert!(OrderStatus::Paid.can_cancel());
        assert!(!OrderStatus::Shipped.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
    }

    #[test]
    fn terminal_set() {
        assert!(!OrderStatus::Created.is_terminal());
        assert!(!OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Shipped.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn as_str_roundtrips_from_str() {
        for status in [
            OrderStatus::Created,
            OrderStatus::Paid,
            OrderStatus::Shipped,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("Draft".parse::<OrderStatus>().is_err());
    }
}
