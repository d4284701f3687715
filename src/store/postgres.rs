use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;

use super::{OrderStore, SettingsStore, Transition};
use crate::domain::aggregates::OrderDraft;
use crate::{Order, OrderDetail, OrderId, OrderLine, OrderStatus, PaymentNotification, PosError, Product, Result};

const ORDER_COLUMNS: &str = "id, order_id, customer_name, customer_phone, gross_amount, status, created_at, paid_at";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    order_id: String,
    customer_name: Option<String>,
    customer_phone: Option<String>,
    gross_amount: i64,
    status: String,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = PosError;

    fn try_from(r: OrderRow) -> Result<Self> {
        Ok(Order {
            id: r.id,
            order_id: OrderId::from_raw(r.order_id),
            customer_name: r.customer_name,
            customer_phone: r.customer_phone,
            gross_amount: r.gross_amount,
            status: r.status.parse()?,
            created_at: r.created_at,
            paid_at: r.paid_at,
        })
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn find_products(&self, ids: &[i64]) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>("SELECT id, sku, name, price, stock, active FROM products WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    async fn list_active_products(&self) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>("SELECT id, sku, name, price, stock, active FROM products WHERE active = TRUE ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    async fn insert_order(&self, draft: &OrderDraft) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (order_id, customer_name, customer_phone, gross_amount, status, created_at) \
             VALUES ($1, $2, $3, $4, 'PENDING', NOW()) ON CONFLICT (order_id) DO NOTHING RETURNING {ORDER_COLUMNS}"
        ))
        .bind(draft.order_id().as_str())
        .bind(draft.customer_name())
        .bind(draft.customer_phone())
        .bind(draft.gross_amount())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            debug!(order_id = %draft.order_id(), "order id collision");
            tx.rollback().await?;
            return Ok(None);
        };

        for line in draft.lines() {
            sqlx::query("INSERT INTO order_items (order_ref, product_id, qty, price) VALUES ($1, $2, $3, $4)")
                .bind(row.id)
                .bind(line.product_id)
                .bind(line.qty)
                .bind(line.price)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        status.map(|s| s.parse::<OrderStatus>()).transpose()
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderDetail>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let items = sqlx::query_as::<_, OrderLine>(
            "SELECT oi.product_id, p.name, oi.qty, oi.price FROM order_items oi \
             JOIN products p ON p.id = oi.product_id WHERE oi.order_ref = $1 ORDER BY oi.id",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(OrderDetail { order: row.try_into()?, items }))
    }

    async fn record_payment(&self, n: &PaymentNotification) -> Result<()> {
        insert_payment(&self.pool, n).await
    }

    async fn apply_notification(&self, n: &PaymentNotification, confirms_payment: bool) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        insert_payment(&mut *tx, n).await?;

        let transition = if !confirms_payment {
            Transition::Unchanged
        } else {
            // Conditional update: concurrent deliveries serialize on the row lock
            // and only the first sees status = 'PENDING'.
            let updated = sqlx::query_as::<_, OrderRow>(&format!(
                "UPDATE orders SET status = 'PAID', paid_at = NOW() WHERE order_id = $1 AND status = 'PENDING' RETURNING {ORDER_COLUMNS}"
            ))
            .bind(&n.order_id)
            .fetch_optional(&mut *tx)
            .await?;
            match updated {
                Some(row) => Transition::Paid(row.try_into()?),
                None => {
                    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM orders WHERE order_id = $1")
                        .bind(&n.order_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                    if exists.is_some() { Transition::AlreadyPaid } else { Transition::OrderMissing }
                }
            }
        };
        tx.commit().await?;
        Ok(transition)
    }
}

async fn insert_payment<'e, E>(executor: E, n: &PaymentNotification) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO payments (order_id, payment_type, transaction_status, transaction_id, fraud_status, raw_json, received_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&n.order_id)
    .bind(&n.payment_type)
    .bind(&n.transaction_status)
    .bind(&n.transaction_id)
    .bind(&n.fraud_status)
    .bind(&n.raw_payload)
    .bind(n.received_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let rows: Vec<(String, Option<String>)> = sqlx::query_as("SELECT key_name, value FROM settings WHERE key_name = ANY($1)")
            .bind(&keys)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect())
    }

    async fn set_many(&self, values: &[(String, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in values {
            sqlx::query("INSERT INTO settings (key_name, value) VALUES ($1, $2) ON CONFLICT (key_name) DO UPDATE SET value = EXCLUDED.value")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
