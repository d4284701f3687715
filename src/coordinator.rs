//! Order / payment lifecycle.
//!
//! Creation: price the cart from the catalog, write the order and its items
//! atomically, then charge the gateway outside any transaction. A failed
//! charge leaves the PENDING order in place.
//!
//! Confirmation: verify the webhook signature against freshly loaded
//! credentials, append the notification, flip PENDING -> PAID with a
//! conditional update, and fan out only when this call won that update.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::domain::aggregates::{Cart, CartLine, OrderDraft, TransactionStatus};
use crate::fanout::{Fanout, FanoutReport, PaymentInfo};
use crate::gateway::{signature, ChargeRequest, GatewayError, PaymentGateway};
use crate::settings::GatewayCredentials;
use crate::store::{OrderStore, SettingsStore, Transition};
use crate::{OrderDetail, OrderId, OrderStatus, PaymentNotification, PhoneNumber, PosError, Product, Result};

const MAX_ORDER_ID_ATTEMPTS: usize = 5;

#[derive(Clone, Debug, Default)]
pub struct NewOrder {
    pub items: Vec<CartLine>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedOrder {
    pub order_id: OrderId,
    pub gross_amount: i64,
    pub payment_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WebhookOutcome {
    /// This delivery moved the order to PAID and ran the fan-out.
    Paid(FanoutReport),
    /// Duplicate success delivery; logged only.
    AlreadyPaid,
    /// Non-final status (pending, expire, deny, ...); logged only.
    Recorded,
    /// Success status for an order id we do not know; logged only.
    UnknownOrder,
}

/// Midtrans HTTP notification, fields as sent (amounts are strings).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: TransactionStatus,
    pub payment_type: Option<String>,
    pub transaction_id: Option<String>,
    pub fraud_status: Option<String>,
}

impl WebhookNotification {
    /// Extracts the signed fields; a payload missing any of them cannot be
    /// authenticated and is rejected as such.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let signed = |key: &str| text_field(payload, key).ok_or(PosError::InvalidSignature);
        Ok(Self {
            order_id: signed("order_id")?,
            status_code: signed("status_code")?,
            gross_amount: signed("gross_amount")?,
            signature_key: signed("signature_key")?,
            transaction_status: TransactionStatus::new(text_field(payload, "transaction_status").unwrap_or_default()),
            payment_type: text_field(payload, "payment_type"),
            transaction_id: text_field(payload, "transaction_id"),
            fraud_status: text_field(payload, "fraud_status"),
        })
    }
}

/// String or number field rendered exactly as the gateway sent it.
fn text_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Source of public order ids.
pub type OrderIdSource = Arc<dyn Fn() -> OrderId + Send + Sync>;

pub struct Coordinator {
    store: Arc<dyn OrderStore>,
    settings: Arc<dyn SettingsStore>,
    gateway: Arc<dyn PaymentGateway>,
    fanout: Fanout,
    gateway_timeout: Duration,
    order_ids: OrderIdSource,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        settings: Arc<dyn SettingsStore>,
        gateway: Arc<dyn PaymentGateway>,
        fanout: Fanout,
        gateway_timeout: Duration,
    ) -> Self {
        Self { store, settings, gateway, fanout, gateway_timeout, order_ids: Arc::new(OrderId::generate) }
    }

    pub fn with_order_ids(mut self, order_ids: OrderIdSource) -> Self {
        self.order_ids = order_ids;
        self
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        self.store.list_active_products().await
    }

    #[instrument(skip_all, fields(lines = request.items.len(), order_id = tracing::field::Empty))]
    pub async fn create_order(&self, request: NewOrder) -> Result<CreatedOrder> {
        let cart = Cart::new(request.items)?;
        let customer_phone = match request.customer_phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => Some(PhoneNumber::parse(raw).map_err(|e| PosError::InvalidPhone(format!("{raw}: {e}")))?.to_string()),
            None => None,
        };

        let catalog: HashMap<i64, Product> = self
            .store
            .find_products(&cart.product_ids())
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let lines = cart.price(&catalog)?;
        let mut draft = OrderDraft::new((self.order_ids)(), request.customer_name, customer_phone, lines)?;

        let mut order = None;
        for _ in 0..MAX_ORDER_ID_ATTEMPTS {
            if let Some(inserted) = self.store.insert_order(&draft).await? {
                order = Some(inserted);
                break;
            }
            warn!(order_id = %draft.order_id(), "order id already taken, regenerating");
            draft.rekey((self.order_ids)());
        }
        let Some(order) = order else {
            error!(attempts = MAX_ORDER_ID_ATTEMPTS, "no free order id");
            return Err(PosError::OrderIdExhausted(MAX_ORDER_ID_ATTEMPTS));
        };
        tracing::Span::current().record("order_id", order.order_id.as_str());
        info!(gross_amount = order.gross_amount, "order created");

        // Order rows are committed; the charge runs outside any transaction.
        let credentials = GatewayCredentials::load(self.settings.as_ref()).await?;
        let charge_request = ChargeRequest::qris(&draft);
        let charge = match tokio::time::timeout(self.gateway_timeout, self.gateway.charge(&credentials, &charge_request)).await {
            Ok(Ok(charge)) => charge,
            Ok(Err(e)) => {
                error!(error = %e, "charge failed, order stays PENDING");
                return Err(e.into());
            }
            Err(_) => {
                error!(timeout = ?self.gateway_timeout, "charge timed out, order stays PENDING");
                return Err(GatewayError::Timeout(self.gateway_timeout).into());
            }
        };

        self.store
            .record_payment(&PaymentNotification {
                order_id: order.order_id.to_string(),
                payment_type: Some(ChargeRequest::QRIS.to_string()),
                transaction_status: charge.transaction_status.clone().unwrap_or_else(|| "pending".into()),
                transaction_id: charge.transaction_id.clone(),
                fraud_status: charge.fraud_status.clone(),
                raw_payload: charge.raw.clone(),
                received_at: chrono::Utc::now(),
            })
            .await?;

        Ok(CreatedOrder {
            order_id: order.order_id,
            gross_amount: order.gross_amount,
            payment_url: charge.payment_action_url().map(str::to_string),
        })
    }

    pub async fn order_status(&self, order_id: &str) -> Result<OrderStatus> {
        self.store.order_status(order_id).await?.ok_or_else(|| PosError::OrderNotFound(order_id.to_string()))
    }

    pub async fn order_detail(&self, order_id: &str) -> Result<OrderDetail> {
        self.store.find_order(order_id).await?.ok_or_else(|| PosError::OrderNotFound(order_id.to_string()))
    }

    #[instrument(skip_all, fields(order_id = tracing::field::Empty))]
    pub async fn handle_notification(&self, payload: Value) -> Result<WebhookOutcome> {
        let notification = WebhookNotification::from_payload(&payload)?;
        tracing::Span::current().record("order_id", notification.order_id.as_str());

        let credentials = GatewayCredentials::load(self.settings.as_ref()).await?;
        if credentials.server_key.is_empty() {
            warn!("server key not configured, rejecting notification");
            return Err(PosError::InvalidSignature);
        }
        let valid = signature::verify(
            &notification.signature_key,
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            &credentials.server_key,
        );
        if !valid {
            warn!("invalid notification signature");
            return Err(PosError::InvalidSignature);
        }

        let record = PaymentNotification {
            order_id: notification.order_id.clone(),
            payment_type: notification.payment_type.clone(),
            transaction_status: notification.transaction_status.as_str().to_string(),
            transaction_id: notification.transaction_id.clone(),
            fraud_status: notification.fraud_status.clone(),
            raw_payload: payload,
            received_at: chrono::Utc::now(),
        };
        let transition = self.store.apply_notification(&record, notification.transaction_status.is_paid()).await?;

        match transition {
            Transition::Paid(order) => {
                info!(gross_amount = order.gross_amount, "order paid");
                let payment = PaymentInfo {
                    payment_type: notification.payment_type,
                    transaction_id: notification.transaction_id,
                };
                let report = match self.store.find_order(order.order_id.as_str()).await {
                    Ok(Some(detail)) => self.fanout.dispatch(&detail, &payment).await,
                    Ok(None) => {
                        error!(order_id = %order.order_id, "PAID order vanished before fan-out; receipt and messages not sent");
                        FanoutReport::default()
                    }
                    Err(e) => {
                        error!(
                            order_id = %order.order_id,
                            error = %e,
                            "could not load PAID order, receipt and messages not sent; resend manually"
                        );
                        FanoutReport::default()
                    }
                };
                Ok(WebhookOutcome::Paid(report))
            }
            Transition::AlreadyPaid => {
                info!("duplicate payment notification for PAID order");
                Ok(WebhookOutcome::AlreadyPaid)
            }
            Transition::Unchanged => {
                info!(status = notification.transaction_status.as_str(), "notification recorded");
                Ok(WebhookOutcome::Recorded)
            }
            Transition::OrderMissing => {
                warn!("payment notification for unknown order");
                Ok(WebhookOutcome::UnknownOrder)
            }
        }
    }
}
