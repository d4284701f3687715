//! Value Objects for the point of sale

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Public order handle, e.g. `ORD-3F9A0C11B2D4`.
///
/// Twelve hex characters of a v4 UUID carry 48 random bits, which keeps
/// shared order links hard to enumerate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub const PREFIX: &'static str = "ORD-";
    const TOKEN_LEN: usize = 12;

    pub fn generate() -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", Self::PREFIX, token[..Self::TOKEN_LEN].to_uppercase()))
    }

    /// Wraps an id read back from storage or a request path.
    pub fn from_raw(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str { &self.0 }
}

/// Indonesian phone number in canonical `62xxxxxxxx` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(input: &str) -> Result<Self, PhoneError> {
        let mut s: String = input.trim().chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();
        if s.is_empty() { return Err(PhoneError::Empty); }
        if let Some(rest) = s.strip_prefix("+62") { s = format!("62{rest}"); }
        if let Some(rest) = s.strip_prefix('0') { s = format!("62{rest}"); }
        if s.starts_with('8') { s = format!("62{s}"); }

        let national = s.strip_prefix("62").ok_or(PhoneError::NotIndonesian)?;
        if !national.chars().all(|c| c.is_ascii_digit()) || !(8..=13).contains(&national.len()) {
            return Err(PhoneError::BadLength);
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    /// WhatsApp JID for this number.
    pub fn jid(&self) -> String { format!("{}@s.whatsapp.net", self.0) }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PhoneError { Empty, NotIndonesian, BadLength }
impl std::error::Error for PhoneError {}
impl fmt::Display for PhoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "phone number is empty"),
            Self::NotIndonesian => write!(f, "phone number is not an Indonesian number"),
            Self::BadLength => write!(f, "phone number must have 8 to 13 digits after 62"),
        }
    }
}

/// Formats an integer rupiah amount with `.` thousands separators: `Rp 20.000`.
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 { grouped.push('.'); }
        grouped.push(c);
    }
    if amount < 0 { format!("Rp -{grouped}") } else { format!("Rp {grouped}") }
}
