//! Order service: one method per command.

use common::AggregateId;
use event_store::EventStore;
use publisher::{EventPublisher, RetryPolicy};

use crate::error::DomainError;
use crate::handler::{Command, CommandHandler, CommandResult};

use super::{CancelOrder, CreateOrder, Order, PayOrder, ShipOrder};

/// High-level write API for orders.
///
/// Thin facade over the [`CommandHandler`]: each method loads the
/// aggregate, invokes the matching domain operation, and lets the handler
/// append + publish.
pub struct OrderService<S: EventStore, P: EventPublisher> {
    handler: CommandHandler<S, P, Order>,
}

impl<S: EventStore, P: EventPublisher> OrderService<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            handler: CommandHandler::new(store, publisher),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.handler = self.handler.with_retry(retry);
        self
    }

    pub fn with_snapshot_every(mut self, snapshot_every: i64) -> Self {
        self.handler = self.handler.with_snapshot_every(snapshot_every);
        self
    }

    pub fn handler(&self) -> &CommandHandler<S, P, Order> {
        &self.handler
    }

    /// Creates an order; the result carries the generated order id.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<CommandResult<Order>, DomainError> {
        let order_id = cmd.aggregate_id();
        self.handler
            .execute_new(order_id, move |order| {
                order.create(
                    order_id,
                    cmd.customer_id,
                    cmd.items.clone(),
                    cmd.shipping_address.clone(),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn pay_order(&self, cmd: PayOrder) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.aggregate_id(), move |order| {
                order.mark_paid(cmd.payment_id.clone(), cmd.amount, cmd.payment_method.clone())
            })
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn ship_order(&self, cmd: ShipOrder) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.aggregate_id(), move |order| {
                order.ship(cmd.shipment_id.clone(), cmd.tracking_number.clone())
            })
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn cancel_order(&self, cmd: CancelOrder) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.aggregate_id(), move |order| {
                order.cancel(cmd.reason.clone())
            })
            .await
    }

    /// Loads an order, `None` when it does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }
}
