//! Write side of the order service.
//!
//! This crate holds:
//! - the [`Aggregate`] and [`DomainEvent`] traits for event-sourced
//!   entities, with dense-version replay,
//! - the [`Order`] aggregate and its event sum type,
//! - the [`CommandHandler`] that loads, invokes, appends with optimistic
//!   concurrency, and publishes,
//! - the [`OrderService`] facade with one method per command.

pub mod aggregate;
pub mod error;
pub mod handler;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent, ReplayError};
pub use error::DomainError;
pub use handler::{Command, CommandHandler, CommandResult};
pub use order::{
    CancelOrder, CreateOrder, CustomerId, Money, Order, OrderCancelledData, OrderCreatedData,
    OrderError, OrderEvent, OrderItem, OrderPaidData, OrderService, OrderShippedData, OrderStatus,
    PayOrder, ProductId, ShipOrder,
};
