//! Cart Aggregate
//!
//! A cart is client-submitted and never persisted. Only product ids and
//! quantities are read from it; prices always come from the catalog.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use crate::{PosError, Product, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    #[serde(deserialize_with = "int_or_text")]
    pub product_id: i64,
    #[serde(default = "default_qty", deserialize_with = "int_or_text")]
    pub qty: i64,
}

fn default_qty() -> i64 { 1 }

/// Accepts `2` or `"2"`; storefront forms post their inputs as strings.
fn int_or_text<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got \"{s}\""))),
    }
}

/// Cart line resolved against the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: i64,
    pub name: String,
    pub qty: i64,
    pub price: i64,
}

impl PricedLine {
    pub fn subtotal(&self) -> i64 { self.price * self.qty }
}

#[derive(Clone, Debug, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new(lines: Vec<CartLine>) -> Result<Self> {
        if lines.is_empty() { return Err(PosError::EmptyCart); }
        Ok(Self { lines })
    }

    pub fn lines(&self) -> &[CartLine] { &self.lines }

    /// Distinct product ids, for a single batch catalog lookup.
    pub fn product_ids(&self) -> Vec<i64> {
        self.lines.iter().map(|l| l.product_id).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Prices every line from `catalog`. Quantities are clamped to at least 1.
    pub fn price(&self, catalog: &HashMap<i64, Product>) -> Result<Vec<PricedLine>> {
        self.lines
            .iter()
            .map(|line| {
                let product = catalog.get(&line.product_id).ok_or(PosError::ProductNotFound(line.product_id))?;
                let qty = line.qty.max(1);
                product.price.checked_mul(qty).ok_or_else(|| {
                    PosError::Validation(format!("quantity {qty} for product {} is too large", product.id))
                })?;
                Ok(PricedLine { product_id: product.id, name: product.name.clone(), qty, price: product.price })
            })
            .collect()
    }
}
