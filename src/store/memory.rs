use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{OrderStore, SettingsStore, Transition};
use crate::domain::aggregates::OrderDraft;
use crate::{Order, OrderDetail, OrderItem, OrderLine, OrderStatus, PaymentNotification, Product, Result};

#[derive(Default)]
struct State {
    products: BTreeMap<i64, Product>,
    orders: Vec<Order>,
    items: Vec<OrderItem>,
    payments: Vec<PaymentNotification>,
}

/// A thread-safe in-memory order store.
///
/// Every write takes the single state lock, so an order and its items
/// become visible together and the PENDING -> PAID check-and-set cannot
/// interleave.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let state = State { products: products.into_iter().map(|p| (p.id, p)).collect(), ..Default::default() };
        Self { state: Arc::new(Mutex::new(state)), fail_writes: Arc::default() }
    }

    pub async fn upsert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Makes every subsequent write fail, simulating a database outage.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.clone()
    }

    pub async fn items(&self) -> Vec<OrderItem> {
        self.state.lock().await.items.clone()
    }

    pub async fn payments(&self) -> Vec<PaymentNotification> {
        self.state.lock().await.payments.clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut.into());
        }
        Ok(())
    }
}

impl State {
    fn lines_for(&self, order: &Order) -> Vec<OrderLine> {
        self.items
            .iter()
            .filter(|i| i.order_ref == order.id)
            .map(|i| OrderLine {
                product_id: i.product_id,
                name: self.products.get(&i.product_id).map(|p| p.name.clone()).unwrap_or_default(),
                qty: i.qty,
                price: i.price,
            })
            .collect()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_products(&self, ids: &[i64]) -> Result<Vec<Product>> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn list_active_products(&self) -> Result<Vec<Product>> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state.products.values().filter(|p| p.active).cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn insert_order(&self, draft: &OrderDraft) -> Result<Option<Order>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if state.orders.iter().any(|o| &o.order_id == draft.order_id()) {
            return Ok(None);
        }
        let order = Order {
            id: state.orders.len() as i64 + 1,
            order_id: draft.order_id().clone(),
            customer_name: draft.customer_name().map(str::to_string),
            customer_phone: draft.customer_phone().map(str::to_string),
            gross_amount: draft.gross_amount(),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            paid_at: None,
        };
        let items = draft
            .lines()
            .iter()
            .map(|l| OrderItem { order_ref: order.id, product_id: l.product_id, qty: l.qty, price: l.price });
        state.items.extend(items);
        state.orders.push(order.clone());
        Ok(Some(order))
    }

    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>> {
        let state = self.state.lock().await;
        Ok(state.orders.iter().find(|o| o.order_id.as_str() == order_id).map(|o| o.status))
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderDetail>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.order_id.as_str() == order_id)
            .map(|o| OrderDetail { order: o.clone(), items: state.lines_for(o) }))
    }

    async fn record_payment(&self, notification: &PaymentNotification) -> Result<()> {
        self.check_writable()?;
        self.state.lock().await.payments.push(notification.clone());
        Ok(())
    }

    async fn apply_notification(&self, notification: &PaymentNotification, confirms_payment: bool) -> Result<Transition> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        state.payments.push(notification.clone());
        if !confirms_payment {
            return Ok(Transition::Unchanged);
        }
        let Some(order) = state.orders.iter_mut().find(|o| o.order_id.as_str() == notification.order_id) else {
            return Ok(Transition::OrderMissing);
        };
        if order.status == OrderStatus::Paid {
            return Ok(Transition::AlreadyPaid);
        }
        order.status = OrderStatus::Paid;
        order.paid_at = Some(Utc::now());
        Ok(Transition::Paid(order.clone()))
    }
}

#[derive(Default, Clone)]
pub struct MemorySettingsStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().await.insert(key.into(), value.into());
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let values = self.values.read().await;
        Ok(keys.iter().filter_map(|k| values.get(*k).map(|v| (k.to_string(), v.clone()))).collect())
    }

    async fn set_many(&self, values: &[(String, String)]) -> Result<()> {
        self.values.write().await.extend(values.iter().cloned());
        Ok(())
    }
}
