//! Payment gateway port and wire types.

pub mod midtrans;
pub mod signature;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::aggregates::OrderDraft;
use crate::settings::GatewayCredentials;

pub use midtrans::MidtransClient;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway server key is not configured")]
    MissingCredentials,

    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway rejected charge ({status_code}): {message}")]
    Rejected { status_code: String, message: String },

    #[error("gateway response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("gateway did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChargeRequest {
    pub payment_type: String,
    pub transaction_details: TransactionDetails,
    pub item_details: Vec<ItemDetail>,
    pub customer_details: CustomerDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransactionDetails {
    pub order_id: String,
    pub gross_amount: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ItemDetail {
    pub id: String,
    pub price: i64,
    pub quantity: i64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CustomerDetails {
    pub first_name: String,
}

impl ChargeRequest {
    pub const QRIS: &'static str = "qris";

    /// QRIS charge mirroring the draft's items, keyed by its public id.
    pub fn qris(draft: &OrderDraft) -> Self {
        Self {
            payment_type: Self::QRIS.to_string(),
            transaction_details: TransactionDetails {
                order_id: draft.order_id().to_string(),
                gross_amount: draft.gross_amount(),
            },
            item_details: draft
                .lines()
                .iter()
                .map(|l| ItemDetail { id: l.product_id.to_string(), price: l.price, quantity: l.qty, name: l.name.clone() })
                .collect(),
            customer_details: CustomerDetails {
                first_name: draft.customer_name().unwrap_or("Pelanggan").to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub method: Option<String>,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChargeResponse {
    pub status_code: Option<String>,
    pub status_message: Option<String>,
    pub transaction_id: Option<String>,
    pub transaction_status: Option<String>,
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub actions: Vec<PaymentAction>,
    pub qr_url: Option<String>,
    /// Full response body, kept for the audit log.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl ChargeResponse {
    pub fn from_json(raw: serde_json::Value) -> Result<Self, GatewayError> {
        let mut response: Self = serde_json::from_value(raw.clone())?;
        response.raw = raw;
        Ok(response)
    }

    /// URL the customer scans or opens: first QR-named action, else `qr_url`.
    pub fn payment_action_url(&self) -> Option<&str> {
        self.actions
            .iter()
            .find(|a| a.name.to_ascii_lowercase().contains("qr"))
            .and_then(|a| a.url.as_deref())
            .or(self.qr_url.as_deref())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, credentials: &GatewayCredentials, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError>;
}
