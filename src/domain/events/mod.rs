//! Domain events
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::OrderLine;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Paid {
        order_id: String,
        gross_amount: i64,
        paid_at: DateTime<Utc>,
        payment_type: Option<String>,
        transaction_id: Option<String>,
        items: Vec<OrderLine>,
    },
}

impl OrderEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Paid { .. } => "pos.order.paid",
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            Self::Paid { order_id, .. } => order_id,
        }
    }
}
