//! Persistence ports for orders, payments, catalog and settings.
//!
//! `postgres` is the production backend; `memory` backs tests and
//! `--memory` runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::aggregates::OrderDraft;
use crate::{Order, OrderDetail, OrderStatus, PaymentNotification, Product, Result};

pub use memory::{MemorySettingsStore, MemoryStore};
pub use postgres::{PgSettingsStore, PgStore};

/// Result of applying a webhook notification to the order it names.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// This call moved the order from PENDING to PAID.
    Paid(Order),
    /// The order was PAID before this call.
    AlreadyPaid,
    /// The notification does not confirm payment; order untouched.
    Unchanged,
    /// No order carries this id.
    OrderMissing,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Batch lookup; unknown ids are simply absent from the result.
    async fn find_products(&self, ids: &[i64]) -> Result<Vec<Product>>;

    async fn list_active_products(&self) -> Result<Vec<Product>>;

    /// Writes the order and all its items atomically.
    ///
    /// Returns `None`, with nothing written, when the draft's public id is
    /// already taken.
    async fn insert_order(&self, draft: &OrderDraft) -> Result<Option<Order>>;

    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>>;

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderDetail>>;

    /// Appends an audit row.
    async fn record_payment(&self, notification: &PaymentNotification) -> Result<()>;

    /// Appends `notification` and, when `confirms_payment`, performs the
    /// conditional PENDING -> PAID update, all in one unit of work.
    async fn apply_notification(&self, notification: &PaymentNotification, confirms_payment: bool) -> Result<Transition>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Values for the requested keys; missing keys are absent.
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>>;

    /// Inserts or overwrites every pair in one unit of work.
    async fn set_many(&self, values: &[(String, String)]) -> Result<()>;
}
