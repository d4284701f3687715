#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use qris_pos::fanout::{Fanout, FanoutError, Messenger, PrintOutcome, Receipt, ReceiptPrinter, ShopInfo};
use qris_pos::gateway::{signature, ChargeRequest, ChargeResponse, GatewayError, PaymentGateway};
use qris_pos::settings::{self, GatewayCredentials};
use qris_pos::store::{MemorySettingsStore, MemoryStore};
use qris_pos::{Coordinator, OrderId, Product};

pub const SERVER_KEY: &str = "SB-Mid-server-TEST";
pub const ADMIN_NUMBER: &str = "0811111111";

#[derive(Default)]
pub struct StubGateway {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    /// Never answers, leaving the caller's timeout to fire.
    pub hang: AtomicBool,
    pub keys_seen: Mutex<Vec<String>>,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn charge(&self, credentials: &GatewayCredentials, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys_seen.lock().unwrap().push(credentials.server_key.clone());
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected { status_code: "500".into(), message: "Internal Server Error".into() });
        }
        ChargeResponse::from_json(json!({
            "status_code": "201",
            "transaction_id": format!("trx-{}", request.transaction_details.order_id),
            "transaction_status": "pending",
            "actions": [{
                "name": "generate-qr-code",
                "method": "GET",
                "url": format!("https://qr.example/{}", request.transaction_details.order_id)
            }]
        }))
    }
}

#[derive(Default)]
pub struct RecordingPrinter {
    pub receipts: Mutex<Vec<Receipt>>,
}

#[async_trait]
impl ReceiptPrinter for RecordingPrinter {
    async fn print(&self, receipt: &Receipt) -> Result<PrintOutcome, FanoutError> {
        self.receipts.lock().unwrap().push(receipt.clone());
        Ok(PrintOutcome::Printed)
    }
}

/// Records deliveries; recipients listed in `unreachable` fail.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(String, String)>>,
    pub unreachable: Mutex<Vec<String>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, recipient: &str, message: &str) -> Result<(), FanoutError> {
        if self.unreachable.lock().unwrap().iter().any(|r| r == recipient) {
            return Err(FanoutError::Transport(format!("{recipient} unreachable")));
        }
        self.sent.lock().unwrap().push((recipient.to_string(), message.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub settings: MemorySettingsStore,
    pub gateway: Arc<StubGateway>,
    pub printer: Arc<RecordingPrinter>,
    pub messenger: Arc<RecordingMessenger>,
    pub coordinator: Arc<Coordinator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(VecDeque::new()).await
    }

    /// Order ids are taken from `ids` first, then generated.
    pub async fn with_order_ids(ids: &[&str]) -> Self {
        Self::build(ids.iter().map(|id| id.to_string()).collect()).await
    }

    async fn build(ids: VecDeque<String>) -> Self {
        let ids = Mutex::new(ids);
        let store = MemoryStore::with_products(catalog());
        let settings = MemorySettingsStore::new();
        settings.set(settings::MIDTRANS_SERVER_KEY, SERVER_KEY).await;
        settings.set(settings::WA_ADMIN_NUMBERS, ADMIN_NUMBER).await;

        let gateway = Arc::new(StubGateway::default());
        let printer = Arc::new(RecordingPrinter::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let fanout = Fanout::new(
            Arc::new(settings.clone()),
            printer.clone(),
            messenger.clone(),
            ShopInfo { name: "TOKO UJI".into(), address: "Jl. Uji No.1".into(), phone: "0800".into() },
            "http://localhost:3000",
            Duration::from_millis(500),
        );
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(store.clone()),
            Arc::new(settings.clone()),
            gateway.clone(),
            fanout,
            Duration::from_millis(500),
        )
        .with_order_ids(Arc::new(move || {
            ids.lock().unwrap().pop_front().map(OrderId::from_raw).unwrap_or_else(OrderId::generate)
        })));
        Self { store, settings, gateway, printer, messenger, coordinator }
    }

    pub fn prints(&self) -> usize {
        self.printer.receipts.lock().unwrap().len()
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.messenger.sent.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }
}

pub fn catalog() -> Vec<Product> {
    vec![
        Product { id: 1, sku: "KOPI-01".into(), name: "Kopi Susu".into(), price: 10_000, stock: 50, active: true },
        Product { id: 2, sku: "TEH-01".into(), name: "Teh Manis".into(), price: 5_000, stock: 50, active: true },
        Product { id: 3, sku: "ROTI-01".into(), name: "Roti Bakar".into(), price: 12_000, stock: 0, active: false },
    ]
}

/// Webhook body signed with `server_key`, amount rendered the way the gateway sends it.
pub fn notification(order_id: &str, transaction_status: &str, gross_amount: &str, server_key: &str) -> Value {
    json!({
        "order_id": order_id,
        "status_code": "200",
        "gross_amount": gross_amount,
        "transaction_status": transaction_status,
        "payment_type": "qris",
        "transaction_id": format!("trx-{order_id}"),
        "fraud_status": "accept",
        "signature_key": signature::compute(order_id, "200", gross_amount, server_key),
    })
}
