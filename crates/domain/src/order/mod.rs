//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod status;
mod value_objects;

pub use aggregate::Order;
pub use commands::{CancelOrder, CreateOrder, PayOrder, ShipOrder};
pub use events::{
    OrderCancelledData, OrderCreatedData, OrderEvent, OrderPaidData, OrderShippedData,
};
pub use service::OrderService;
pub use status::OrderStatus;
pub use value_objects::{CustomerId, Money, OrderItem, ProductId};

use thiserror::Error;

/// Errors the order aggregate can reject a command with.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The command's input is unacceptable regardless of state.
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    /// The order's current status does not permit the operation.
    #[error("illegal transition: cannot {action} an order in {status} status")]
    IllegalTransition {
        status: OrderStatus,
        action: &'static str,
    },
}

impl OrderError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        OrderError::InvalidCommand {
            reason: reason.into(),
        }
    }
}
