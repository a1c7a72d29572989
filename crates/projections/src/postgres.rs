use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{CustomerId, Money, OrderStatus, ProductId};
use event_store::Version;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::read_model::{
    OrderItemRow, OrderMutation, OrderRow, ReadModelStore, StatusHistoryRow,
};
use crate::{ProjectionError, Result};

/// PostgreSQL read model.
///
/// Money columns are DECIMAL(18,2); the domain keeps integer cents, so SQL
/// converts on the boundary (`/ 100.0` writing, `* 100` reading) and no
/// floating point crosses into Rust.
#[derive(Clone)]
pub struct PgReadModelStore {
    pool: PgPool,
}

impl PgReadModelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: PgRow) -> Result<OrderRow> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<OrderStatus>()
            .map_err(ProjectionError::Consumer)?;

        Ok(OrderRow {
            id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            shipping_address: row.try_get("shipping_address")?,
            status,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            payment_id: row.try_get("payment_id")?,
            payment_method: row.try_get("payment_method")?,
            shipment_id: row.try_get("shipment_id")?,
            tracking_number: row.try_get("tracking_number")?,
        })
    }
}

#[async_trait]
impl ReadModelStore for PgReadModelStore {
    async fn last_applied_version(&self, order_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn apply(&self, mutation: OrderMutation) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        match mutation {
            OrderMutation::Insert { order, items } => {
                sqlx::query(
                    r#"
                    INSERT INTO orders (
                        id, customer_id, total_amount, shipping_address, status,
                        version, created_at, updated_at
                    )
                    VALUES ($1, $2, $3::numeric / 100.0, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(order.id.as_uuid())
                .bind(order.customer_id.as_uuid())
                .bind(order.total_amount.cents())
                .bind(&order.shipping_address)
                .bind(order.status.as_str())
                .bind(order.version.as_i64())
                .bind(order.created_at)
                .bind(order.updated_at)
                .execute(&mut *tx)
                .await?;

                for item in &items {
                    sqlx::query(
                        r#"
                        INSERT INTO order_items (
                            order_id, product_id, product_name, quantity, unit_price
                        )
                        VALUES ($1, $2, $3, $4, $5::numeric / 100.0)
                        "#,
                    )
                    .bind(item.order_id.as_uuid())
                    .bind(item.product_id.as_str())
                    .bind(&item.product_name)
                    .bind(item.quantity as i32)
                    .bind(item.unit_price.cents())
                    .execute(&mut *tx)
                    .await?;
                }

                insert_history(&mut tx, order.id, OrderStatus::Created, order.created_at, None)
                    .await?;
            }
            OrderMutation::SetPaid {
                order_id,
                version,
                timestamp,
                payment_id,
                payment_method,
            } => {
                sqlx::query(
                    r#"
                    UPDATE orders
                    SET status = $2, version = $3, updated_at = $4,
                        payment_id = $5, payment_method = $6
                    WHERE id = $1
                    "#,
                )
                .bind(order_id.as_uuid())
                .bind(OrderStatus::Paid.as_str())
                .bind(version.as_i64())
                .bind(timestamp)
                .bind(&payment_id)
                .bind(&payment_method)
                .execute(&mut *tx)
                .await?;

                insert_history(&mut tx, order_id, OrderStatus::Paid, timestamp, None).await?;
            }
            OrderMutation::SetShipped {
                order_id,
                version,
                timestamp,
                shipment_id,
                tracking_number,
            } => {
                sqlx::query(
                    r#"
                    UPDATE orders
                    SET status = $2, version = $3, updated_at = $4,
                        shipment_id = $5, tracking_number = $6
                    WHERE id = $1
                    "#,
                )
                .bind(order_id.as_uuid())
                .bind(OrderStatus::Shipped.as_str())
                .bind(version.as_i64())
                .bind(timestamp)
                .bind(&shipment_id)
                .bind(&tracking_number)
                .execute(&mut *tx)
                .await?;

                insert_history(&mut tx, order_id, OrderStatus::Shipped, timestamp, None).await?;
            }
            OrderMutation::SetCancelled {
                order_id,
                version,
                timestamp,
                reason,
            } => {
                sqlx::query(
                    r#"
                    UPDATE orders
                    SET status = $2, version = $3, updated_at = $4
                    WHERE id = $1
                    "#,
                )
                .bind(order_id.as_uuid())
                .bind(OrderStatus::Cancelled.as_str())
                .bind(version.as_i64())
                .bind(timestamp)
                .execute(&mut *tx)
                .await?;

                insert_history(
                    &mut tx,
                    order_id,
                    OrderStatus::Cancelled,
                    timestamp,
                    Some(&reason),
                )
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, order_id: AggregateId) -> Result<Option<OrderRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, (total_amount * 100)::BIGINT AS total_amount_cents,
                   shipping_address, status, version, created_at, updated_at,
                   payment_id, payment_method, shipment_id, tracking_number
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_items(&self, order_id: AggregateId) -> Result<Vec<OrderItemRow>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity,
                   (unit_price * 100)::BIGINT AS unit_price_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY product_id
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(OrderItemRow {
                    order_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
                    product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                    product_name: row.try_get("product_name")?,
                    quantity: row.try_get::<i32, _>("quantity")? as u32,
                    unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
                })
            })
            .collect()
    }

    async fn get_history(&self, order_id: AggregateId) -> Result<Vec<StatusHistoryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, status, timestamp, reason
            FROM order_status_history
            WHERE order_id = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(StatusHistoryRow {
                    order_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
                    status: status
                        .parse::<OrderStatus>()
                        .map_err(ProjectionError::Consumer)?,
                    timestamp: row.try_get("timestamp")?,
                    reason: row.try_get("reason")?,
                })
            })
            .collect()
    }
}

async fn insert_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: AggregateId,
    status: OrderStatus,
    timestamp: DateTime<Utc>,
    reason: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO order_status_history (order_id, status, timestamp, reason)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(status.as_str())
    .bind(timestamp)
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
