//! Order Aggregate

use crate::domain::aggregates::cart::PricedLine;
use crate::domain::value_objects::OrderId;
use crate::{PosError, Result};

/// A priced order ready to be written: header fields plus snapshot lines.
///
/// Invariant: `gross_amount == sum(price * qty)` over `lines`.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    order_id: OrderId,
    customer_name: Option<String>,
    customer_phone: Option<String>,
    lines: Vec<PricedLine>,
    gross_amount: i64,
}

impl OrderDraft {
    pub fn new(order_id: OrderId, customer_name: Option<String>, customer_phone: Option<String>, lines: Vec<PricedLine>) -> Result<Self> {
        if lines.is_empty() { return Err(PosError::EmptyCart); }
        let gross_amount = lines
            .iter()
            .try_fold(0i64, |acc, l| l.price.checked_mul(l.qty).and_then(|s| acc.checked_add(s)))
            .ok_or_else(|| PosError::Validation("order total is too large".into()))?;
        Ok(Self {
            order_id,
            customer_name: customer_name.filter(|s| !s.trim().is_empty()),
            customer_phone: customer_phone.filter(|s| !s.trim().is_empty()),
            lines,
            gross_amount,
        })
    }

    pub fn order_id(&self) -> &OrderId { &self.order_id }
    pub fn customer_name(&self) -> Option<&str> { self.customer_name.as_deref() }
    pub fn customer_phone(&self) -> Option<&str> { self.customer_phone.as_deref() }
    pub fn lines(&self) -> &[PricedLine] { &self.lines }
    pub fn gross_amount(&self) -> i64 { self.gross_amount }

    /// Swaps in a fresh public id after a collision in the store.
    pub fn rekey(&mut self, order_id: OrderId) { self.order_id = order_id; }
}

/// Gateway-reported transaction status (`settlement`, `pending`, `expire`, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionStatus(String);

impl TransactionStatus {
    const PAID: [&'static str; 3] = ["settlement", "capture", "success"];

    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }

    /// Whether this status confirms the payment and moves the order to PAID.
    pub fn is_paid(&self) -> bool { Self::PAID.contains(&self.0.as_str()) }
}
