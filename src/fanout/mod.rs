//! Best-effort side effects of a confirmed payment.
//!
//! Every call here is bounded by a timeout and every failure is logged and
//! swallowed: the order is already PAID by the time fan-out runs, and
//! nothing in this module may undo or block that.

pub mod events;
pub mod printer;
pub mod whatsapp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::events::OrderEvent;
use crate::domain::value_objects::format_rupiah;
use crate::store::SettingsStore;
use crate::{settings, OrderDetail, OrderLine};

pub use events::{EventPublisher, NatsPublisher};
pub use printer::EscPosPrinter;
pub use whatsapp::{HttpBridgeTransport, WhatsAppSession};

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("printer I/O failed: {0}")]
    Printer(#[from] std::io::Error),

    #[error("WhatsApp session is not ready")]
    NotReady,

    #[error("WhatsApp is not configured")]
    NotConfigured,

    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("event publish failed: {0}")]
    Publish(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("settings unavailable: {0}")]
    Settings(String),
}

impl From<reqwest::Error> for FanoutError {
    fn from(e: reqwest::Error) -> Self { Self::Transport(e.to_string()) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShopInfo {
    pub name: String,
    pub address: String,
    pub phone: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub shop: ShopInfo,
    pub order_id: String,
    pub gross_amount: i64,
    pub items: Vec<OrderLine>,
    pub payment_type: Option<String>,
    pub transaction_id: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrintOutcome {
    Printed,
    /// Printing switched off or no printer host configured.
    Disabled,
}

#[async_trait]
pub trait ReceiptPrinter: Send + Sync {
    async fn print(&self, receipt: &Receipt) -> Result<PrintOutcome, FanoutError>;
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends `message` to a phone number; invalid numbers fail before any delivery attempt.
    async fn send_text(&self, recipient: &str, message: &str) -> Result<(), FanoutError>;
}

/// Payment details carried from the webhook into the fan-out.
#[derive(Clone, Debug, Default)]
pub struct PaymentInfo {
    pub payment_type: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FanoutReport {
    pub printed: Option<PrintOutcome>,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    pub published: bool,
}

pub struct Fanout {
    settings: Arc<dyn SettingsStore>,
    printer: Arc<dyn ReceiptPrinter>,
    messenger: Arc<dyn Messenger>,
    events: Option<Arc<dyn EventPublisher>>,
    shop: ShopInfo,
    app_url: String,
    timeout: Duration,
}

impl Fanout {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        printer: Arc<dyn ReceiptPrinter>,
        messenger: Arc<dyn Messenger>,
        shop: ShopInfo,
        app_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self { settings, printer, messenger, events: None, shop, app_url: app_url.into(), timeout }
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Prints, messages each recipient independently, then publishes `order.paid`.
    pub async fn dispatch(&self, detail: &OrderDetail, payment: &PaymentInfo) -> FanoutReport {
        let order = &detail.order;
        let paid_at = order.paid_at.unwrap_or_else(Utc::now);
        let mut report = FanoutReport::default();

        let receipt = Receipt {
            shop: self.shop.clone(),
            order_id: order.order_id.to_string(),
            gross_amount: order.gross_amount,
            items: detail.items.clone(),
            payment_type: payment.payment_type.clone(),
            transaction_id: payment.transaction_id.clone(),
            paid_at,
        };
        match self.bounded(self.printer.print(&receipt)).await {
            Ok(outcome) => report.printed = Some(outcome),
            Err(e) => warn!(order_id = %order.order_id, error = %e, "receipt print failed"),
        }

        let text = self.compose_message(detail);
        for recipient in self.recipients(detail).await {
            match self.bounded(self.messenger.send_text(&recipient, &text)).await {
                Ok(()) => report.delivered.push(recipient),
                Err(e) => {
                    warn!(order_id = %order.order_id, %recipient, error = %e, "WhatsApp send failed");
                    report.failed.push(recipient);
                }
            }
        }

        if let Some(events) = &self.events {
            let event = OrderEvent::Paid {
                order_id: order.order_id.to_string(),
                gross_amount: order.gross_amount,
                paid_at,
                payment_type: payment.payment_type.clone(),
                transaction_id: payment.transaction_id.clone(),
                items: detail.items.clone(),
            };
            match self.bounded(events.publish(&event)).await {
                Ok(()) => report.published = true,
                Err(e) => warn!(order_id = %order.order_id, error = %e, "event publish failed"),
            }
        }

        info!(order_id = %order.order_id, delivered = report.delivered.len(), failed = report.failed.len(), "fan-out finished");
        report
    }

    /// Admin numbers from settings plus the customer's phone when present.
    async fn recipients(&self, detail: &OrderDetail) -> Vec<String> {
        let mut recipients = match settings::admin_numbers(self.settings.as_ref()).await {
            Ok(numbers) => numbers,
            Err(e) => {
                warn!(error = %e, "could not load admin numbers");
                Vec::new()
            }
        };
        if let Some(phone) = detail.order.customer_phone.as_deref().filter(|p| !p.trim().is_empty()) {
            recipients.push(phone.to_string());
        }
        recipients
    }

    pub fn compose_message(&self, detail: &OrderDetail) -> String {
        let order = &detail.order;
        let mut lines = vec![
            "Pembayaran SUKSES ✅".to_string(),
            format!("Order: {}", order.order_id),
            format!("Total: {}", format_rupiah(order.gross_amount)),
            "Detail:".to_string(),
        ];
        lines.extend(detail.items.iter().map(|i| format!("• {} x{} = {}", i.name, i.qty, format_rupiah(i.subtotal()))));
        lines.push(format!("{}/o/{}", self.app_url.trim_end_matches('/'), order.order_id));
        lines.join("\n")
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T, FanoutError>>) -> Result<T, FanoutError> {
        tokio::time::timeout(self.timeout, fut).await.unwrap_or(Err(FanoutError::Timeout(self.timeout)))
    }
}
