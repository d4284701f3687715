mod common;

use std::sync::atomic::Ordering;

use common::{notification, Harness, ADMIN_NUMBER, SERVER_KEY};
use qris_pos::coordinator::NewOrder;
use qris_pos::domain::aggregates::CartLine;
use qris_pos::gateway::GatewayError;
use qris_pos::settings;
use qris_pos::{OrderStatus, PosError, WebhookOutcome};

fn cart(lines: &[(i64, i64)]) -> Vec<CartLine> {
    lines.iter().map(|&(product_id, qty)| CartLine { product_id, qty }).collect()
}

fn order(lines: &[(i64, i64)], phone: Option<&str>) -> NewOrder {
    NewOrder { items: cart(lines), customer_name: Some("Budi".into()), customer_phone: phone.map(str::to_string) }
}

#[tokio::test]
async fn test_create_order_prices_from_catalog() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 2)], None)).await.unwrap();

    assert_eq!(created.gross_amount, 20_000);
    assert!(created.order_id.as_str().starts_with("ORD-"));
    assert_eq!(created.payment_url, Some(format!("https://qr.example/{}", created.order_id)));
    assert_eq!(h.coordinator.order_status(created.order_id.as_str()).await.unwrap(), OrderStatus::Pending);

    let items = h.store.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!((items[0].qty, items[0].price), (2, 10_000));

    // the charge response is logged against the order
    let payments = h.store.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].transaction_status, "pending");
    assert_eq!(payments[0].order_id, created.order_id.as_str());
}

#[tokio::test]
async fn test_gross_amount_sums_all_lines_and_clamps_qty() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 1), (2, 3), (2, 0)], None)).await.unwrap();
    assert_eq!(created.gross_amount, 10_000 + 15_000 + 5_000);
    assert_eq!(h.store.items().await.len(), 3);
}

#[tokio::test]
async fn test_inactive_product_can_still_be_ordered() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(3, 1)], None)).await.unwrap();
    assert_eq!(created.gross_amount, 12_000);
}

#[tokio::test]
async fn test_empty_cart_writes_nothing() {
    let h = Harness::new().await;
    let err = h.coordinator.create_order(order(&[], None)).await.unwrap_err();
    assert!(matches!(err, PosError::EmptyCart));
    assert!(h.store.orders().await.is_empty());
    assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_product_writes_nothing() {
    let h = Harness::new().await;
    let err = h.coordinator.create_order(order(&[(1, 1), (99, 1)], None)).await.unwrap_err();
    assert!(matches!(err, PosError::ProductNotFound(99)));
    assert!(h.store.orders().await.is_empty());
    assert!(h.store.items().await.is_empty());
    assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_customer_phone_writes_nothing() {
    let h = Harness::new().await;
    let err = h.coordinator.create_order(order(&[(1, 1)], Some("12345"))).await.unwrap_err();
    assert!(matches!(err, PosError::InvalidPhone(_)));
    assert!(h.store.orders().await.is_empty());
}

#[tokio::test]
async fn test_customer_phone_is_normalized() {
    let h = Harness::new().await;
    h.coordinator.create_order(order(&[(1, 1)], Some("0812-3456-7890"))).await.unwrap();
    assert_eq!(h.store.orders().await[0].customer_phone.as_deref(), Some("6281234567890"));
}

#[tokio::test]
async fn test_gateway_failure_keeps_pending_order() {
    let h = Harness::new().await;
    h.gateway.fail.store(true, Ordering::SeqCst);

    let err = h.coordinator.create_order(order(&[(1, 2)], None)).await.unwrap_err();
    assert!(matches!(err, PosError::Gateway(_)));

    let orders = h.store.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert!(h.store.payments().await.is_empty());
}

#[tokio::test]
async fn test_gateway_timeout_keeps_pending_order() {
    let h = Harness::new().await;
    h.gateway.hang.store(true, Ordering::SeqCst);

    let err = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap_err();
    assert!(matches!(err, PosError::Gateway(GatewayError::Timeout(_))), "got {err:?}");

    let orders = h.store.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert!(h.store.payments().await.is_empty());
}

#[tokio::test]
async fn test_order_id_collision_is_retried() {
    let h = Harness::with_order_ids(&["ORD-TAKEN", "ORD-TAKEN", "ORD-TAKEN", "ORD-FRESH"]).await;
    let first = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();
    assert_eq!(first.order_id.as_str(), "ORD-TAKEN");

    let second = h.coordinator.create_order(order(&[(2, 2)], None)).await.unwrap();
    assert_eq!(second.order_id.as_str(), "ORD-FRESH");
    assert_eq!(second.gross_amount, 10_000);

    let orders = h.store.orders().await;
    assert_eq!(orders.len(), 2);
    // the colliding attempts wrote no stray lines
    assert_eq!(h.store.items().await.len(), 2);
}

#[tokio::test]
async fn test_order_id_exhaustion_is_a_server_error() {
    let h = Harness::with_order_ids(&["ORD-TAKEN"; 6]).await;
    h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();

    let err = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap_err();
    assert!(matches!(err, PosError::OrderIdExhausted(5)), "got {err:?}");
    assert!(!err.is_validation());
    assert_eq!(h.store.orders().await.len(), 1);
    assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_settlement_marks_paid_and_fans_out() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 2)], Some("081234567890"))).await.unwrap();
    let id = created.order_id.as_str();

    let outcome = h.coordinator.handle_notification(notification(id, "settlement", "20000.00", SERVER_KEY)).await.unwrap();
    let WebhookOutcome::Paid(report) = outcome else { panic!("expected Paid, got {outcome:?}") };
    assert_eq!(report.delivered, vec![ADMIN_NUMBER.to_string(), "6281234567890".to_string()]);
    assert!(report.failed.is_empty());

    assert_eq!(h.coordinator.order_status(id).await.unwrap(), OrderStatus::Paid);
    let detail = h.coordinator.order_detail(id).await.unwrap();
    assert!(detail.order.paid_at.is_some());
    assert_eq!(detail.items[0].name, "Kopi Susu");

    assert_eq!(h.prints(), 1);
    let receipt = h.printer.receipts.lock().unwrap()[0].clone();
    assert_eq!(receipt.gross_amount, 20_000);
    assert_eq!(receipt.transaction_id.as_deref(), Some(format!("trx-{id}").as_str()));

    let sent = h.messenger.sent.lock().unwrap().clone();
    assert!(sent[0].1.contains("Total: Rp 20.000"));
    assert!(sent[0].1.ends_with(&format!("http://localhost:3000/o/{id}")));
}

#[tokio::test]
async fn test_capture_also_confirms_payment() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(2, 1)], None)).await.unwrap();
    let id = created.order_id.as_str();
    let outcome = h.coordinator.handle_notification(notification(id, "capture", "5000.00", SERVER_KEY)).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Paid(_)));
}

#[tokio::test]
async fn test_pending_notification_is_only_logged() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 2)], None)).await.unwrap();
    let id = created.order_id.as_str();

    let outcome = h.coordinator.handle_notification(notification(id, "pending", "20000.00", SERVER_KEY)).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Recorded);
    assert_eq!(h.coordinator.order_status(id).await.unwrap(), OrderStatus::Pending);
    assert_eq!(h.prints(), 0);
    assert!(h.sent_to().is_empty());
    assert_eq!(h.store.payments().await.len(), 2);
}

#[tokio::test]
async fn test_expire_after_paid_does_not_revert() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();
    let id = created.order_id.as_str();
    h.coordinator.handle_notification(notification(id, "settlement", "10000.00", SERVER_KEY)).await.unwrap();

    let outcome = h.coordinator.handle_notification(notification(id, "expire", "10000.00", SERVER_KEY)).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Recorded);
    assert_eq!(h.coordinator.order_status(id).await.unwrap(), OrderStatus::Paid);
}

#[tokio::test]
async fn test_duplicate_settlement_fans_out_once() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 2)], None)).await.unwrap();
    let id = created.order_id.as_str();
    let payload = notification(id, "settlement", "20000.00", SERVER_KEY);

    let first = h.coordinator.handle_notification(payload.clone()).await.unwrap();
    let second = h.coordinator.handle_notification(payload).await.unwrap();
    assert!(matches!(first, WebhookOutcome::Paid(_)));
    assert_eq!(second, WebhookOutcome::AlreadyPaid);

    assert_eq!(h.prints(), 1);
    assert_eq!(h.sent_to(), vec![ADMIN_NUMBER.to_string()]);
    // charge log + both deliveries
    assert_eq!(h.store.payments().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlements_have_one_winner() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 2)], None)).await.unwrap();
    let payload = notification(created.order_id.as_str(), "settlement", "20000.00", SERVER_KEY);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            let payload = payload.clone();
            tokio::spawn(async move { coordinator.handle_notification(payload).await })
        })
        .collect();

    let mut paid = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            WebhookOutcome::Paid(_) => paid += 1,
            WebhookOutcome::AlreadyPaid => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(paid, 1);
    assert_eq!(h.prints(), 1);
    assert_eq!(h.sent_to().len(), 1);
}

#[tokio::test]
async fn test_bad_signature_changes_nothing() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 2)], None)).await.unwrap();
    let id = created.order_id.as_str();

    let forged = notification(id, "settlement", "20000.00", "not-the-key");
    assert!(matches!(h.coordinator.handle_notification(forged).await, Err(PosError::InvalidSignature)));

    // amount altered after signing
    let mut tampered = notification(id, "settlement", "20000.00", SERVER_KEY);
    tampered["gross_amount"] = "1.00".into();
    assert!(matches!(h.coordinator.handle_notification(tampered).await, Err(PosError::InvalidSignature)));

    assert_eq!(h.coordinator.order_status(id).await.unwrap(), OrderStatus::Pending);
    assert_eq!(h.store.payments().await.len(), 1);
    assert_eq!(h.prints(), 0);
}

#[tokio::test]
async fn test_missing_server_key_rejects_every_notification() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();
    h.settings.set(settings::MIDTRANS_SERVER_KEY, "").await;

    let payload = notification(created.order_id.as_str(), "settlement", "10000.00", "");
    assert!(matches!(h.coordinator.handle_notification(payload).await, Err(PosError::InvalidSignature)));
}

#[tokio::test]
async fn test_rotated_key_applies_without_restart() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();
    let id = created.order_id.as_str();

    h.settings.set(settings::MIDTRANS_SERVER_KEY, "SB-Mid-server-ROTATED").await;
    let stale = notification(id, "settlement", "10000.00", SERVER_KEY);
    assert!(matches!(h.coordinator.handle_notification(stale).await, Err(PosError::InvalidSignature)));

    let fresh = notification(id, "settlement", "10000.00", "SB-Mid-server-ROTATED");
    assert!(matches!(h.coordinator.handle_notification(fresh).await.unwrap(), WebhookOutcome::Paid(_)));

    h.coordinator.create_order(order(&[(2, 1)], None)).await.unwrap();
    let keys = h.gateway.keys_seen.lock().unwrap().clone();
    assert_eq!(keys, vec![SERVER_KEY.to_string(), "SB-Mid-server-ROTATED".to_string()]);
}

#[tokio::test]
async fn test_settlement_for_unknown_order_is_acknowledged() {
    let h = Harness::new().await;
    let outcome = h.coordinator.handle_notification(notification("ORD-UNKNOWN", "settlement", "1.00", SERVER_KEY)).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::UnknownOrder);
    assert_eq!(h.prints(), 0);
    assert_eq!(h.store.payments().await.len(), 1);
}

#[tokio::test]
async fn test_persistence_failure_surfaces_and_keeps_pending() {
    let h = Harness::new().await;
    let created = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();
    let id = created.order_id.as_str();

    h.store.set_fail_writes(true);
    let err = h.coordinator.handle_notification(notification(id, "settlement", "10000.00", SERVER_KEY)).await.unwrap_err();
    assert!(matches!(err, PosError::Database(_)));
    assert_eq!(h.coordinator.order_status(id).await.unwrap(), OrderStatus::Pending);
    assert_eq!(h.prints(), 0);

    // the gateway retries once the database is back
    h.store.set_fail_writes(false);
    let retry = h.coordinator.handle_notification(notification(id, "settlement", "10000.00", SERVER_KEY)).await.unwrap();
    assert!(matches!(retry, WebhookOutcome::Paid(_)));
}

#[tokio::test]
async fn test_one_unreachable_recipient_does_not_block_others() {
    let h = Harness::new().await;
    h.messenger.unreachable.lock().unwrap().push(ADMIN_NUMBER.to_string());
    let created = h.coordinator.create_order(order(&[(1, 1)], Some("081234567890"))).await.unwrap();

    let outcome = h
        .coordinator
        .handle_notification(notification(created.order_id.as_str(), "settlement", "10000.00", SERVER_KEY))
        .await
        .unwrap();
    let WebhookOutcome::Paid(report) = outcome else { panic!("expected Paid") };
    assert_eq!(report.failed, vec![ADMIN_NUMBER.to_string()]);
    assert_eq!(report.delivered, vec!["6281234567890".to_string()]);
    assert_eq!(h.prints(), 1);
    assert_eq!(h.coordinator.order_status(created.order_id.as_str()).await.unwrap(), OrderStatus::Paid);
}

#[tokio::test]
async fn test_order_ids_are_unique_across_orders() {
    let h = Harness::new().await;
    let a = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();
    let b = h.coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();
    assert_ne!(a.order_id, b.order_id);
}

#[tokio::test]
async fn test_unknown_order_status_is_not_found() {
    let h = Harness::new().await;
    assert!(matches!(h.coordinator.order_status("ORD-NOPE").await, Err(PosError::OrderNotFound(_))));
}

#[tokio::test]
async fn test_product_listing_hides_inactive() {
    let h = Harness::new().await;
    let names: Vec<String> = h.coordinator.list_products().await.unwrap().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["Kopi Susu", "Teh Manis"]);
}

/// Delegates to the memory store but cannot read orders back.
struct UnreadableOrders(qris_pos::store::MemoryStore);

#[async_trait::async_trait]
impl qris_pos::store::OrderStore for UnreadableOrders {
    async fn find_products(&self, ids: &[i64]) -> qris_pos::Result<Vec<qris_pos::Product>> {
        self.0.find_products(ids).await
    }
    async fn list_active_products(&self) -> qris_pos::Result<Vec<qris_pos::Product>> {
        self.0.list_active_products().await
    }
    async fn insert_order(&self, draft: &qris_pos::domain::aggregates::OrderDraft) -> qris_pos::Result<Option<qris_pos::Order>> {
        self.0.insert_order(draft).await
    }
    async fn order_status(&self, order_id: &str) -> qris_pos::Result<Option<OrderStatus>> {
        self.0.order_status(order_id).await
    }
    async fn find_order(&self, _order_id: &str) -> qris_pos::Result<Option<qris_pos::OrderDetail>> {
        Err(PosError::Database(sqlx::Error::PoolTimedOut))
    }
    async fn record_payment(&self, notification: &qris_pos::PaymentNotification) -> qris_pos::Result<()> {
        self.0.record_payment(notification).await
    }
    async fn apply_notification(
        &self,
        notification: &qris_pos::PaymentNotification,
        confirms_payment: bool,
    ) -> qris_pos::Result<qris_pos::store::Transition> {
        self.0.apply_notification(notification, confirms_payment).await
    }
}

#[tokio::test]
async fn test_unreadable_paid_order_still_acknowledged() {
    use qris_pos::fanout::{Fanout, ShopInfo};
    use qris_pos::Coordinator;
    use std::sync::Arc;
    use std::time::Duration;

    let h = Harness::new().await;
    let fanout = Fanout::new(
        Arc::new(h.settings.clone()),
        h.printer.clone(),
        h.messenger.clone(),
        ShopInfo::default(),
        "http://localhost:3000",
        Duration::from_millis(200),
    );
    let coordinator = Coordinator::new(
        Arc::new(UnreadableOrders(h.store.clone())),
        Arc::new(h.settings.clone()),
        h.gateway.clone(),
        fanout,
        Duration::from_millis(200),
    );
    let created = coordinator.create_order(order(&[(1, 1)], None)).await.unwrap();
    let id = created.order_id.as_str();

    let outcome = coordinator.handle_notification(notification(id, "settlement", "10000.00", SERVER_KEY)).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Paid(Default::default()));
    assert_eq!(coordinator.order_status(id).await.unwrap(), OrderStatus::Paid);
    assert_eq!(h.prints(), 0);
    assert!(h.sent_to().is_empty());
}
