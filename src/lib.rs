//! QRIS Point-of-Sale backend
//!
//! Storefront orders paid through a QRIS charge, confirmed by a signed
//! payment webhook and announced through receipt printing and WhatsApp.
//!
//! ## Features
//! - Server-side cart pricing and atomic order creation
//! - Midtrans Core API charge and webhook verification
//! - Idempotent PENDING -> PAID transition
//! - Best-effort receipt / WhatsApp / event fan-out

pub mod api;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod fanout;
pub mod gateway;
pub mod settings;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use coordinator::{Coordinator, CreatedOrder, WebhookOutcome};
pub use domain::value_objects::{OrderId, PhoneNumber};

// =============================================================================
// Core Types
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    /// Smallest currency unit (rupiah).
    pub price: i64,
    pub stock: i32,
    pub active: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = PosError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            other => Err(PosError::Validation(format!("unknown order status '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub gross_amount: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Persisted line; `price` is the catalog price snapshot taken at order time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_ref: i64,
    pub product_id: i64,
    pub qty: i64,
    pub price: i64,
}

/// Order line joined with the product name, used by the public view and fan-out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderLine {
    pub product_id: i64,
    pub name: String,
    pub qty: i64,
    pub price: i64,
}

impl OrderLine {
    pub fn subtotal(&self) -> i64 {
        self.price * self.qty
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderLine>,
}

/// Append-only audit row: one per charge attempt, one per webhook delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    pub payment_type: Option<String>,
    pub transaction_status: String,
    pub transaction_id: Option<String>,
    pub fraud_status: Option<String>,
    pub raw_payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum PosError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {0} not found")]
    ProductNotFound(i64),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Could not allocate a unique order id after {0} attempts")]
    OrderIdExhausted(usize),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] gateway::GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification error: {0}")]
    Fanout(#[from] fanout::FanoutError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PosError {
    /// Caller errors that leave no state behind.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyCart | Self::ProductNotFound(_) | Self::InvalidPhone(_) | Self::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PosError>;
