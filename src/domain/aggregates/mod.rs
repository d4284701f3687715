//! Aggregates module
pub mod cart;
pub mod order;

pub use cart::{Cart, CartLine, PricedLine};
pub use order::{OrderDraft, TransactionStatus};
