//! Typed views over the `settings` key/value table.
//!
//! Nothing here is cached: every view is loaded fresh at the start of the
//! operation that needs it, so operators can rotate gateway keys or move the
//! printer without a restart.

use std::collections::BTreeMap;
use std::fmt;

use crate::store::SettingsStore;
use crate::{PosError, Result};

pub const MIDTRANS_SERVER_KEY: &str = "midtrans_server_key";
pub const MIDTRANS_CLIENT_KEY: &str = "midtrans_client_key";
pub const MIDTRANS_IS_PRODUCTION: &str = "midtrans_is_production";
pub const WA_ADMIN_NUMBERS: &str = "wa_admin_numbers";
pub const PRINTER_ENABLED: &str = "printer_enabled";
pub const PRINTER_HOST: &str = "printer_host";
pub const PRINTER_PORT: &str = "printer_port";

/// Keys editable from the admin settings endpoint.
pub const KEYS: [&str; 7] = [
    MIDTRANS_SERVER_KEY,
    MIDTRANS_CLIENT_KEY,
    MIDTRANS_IS_PRODUCTION,
    WA_ADMIN_NUMBERS,
    PRINTER_ENABLED,
    PRINTER_HOST,
    PRINTER_PORT,
];

const DEFAULT_PRINTER_PORT: u16 = 9100;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct GatewayCredentials {
    pub server_key: String,
    pub client_key: String,
    pub is_production: bool,
}

impl GatewayCredentials {
    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        let mut map = store.get_many(&[MIDTRANS_SERVER_KEY, MIDTRANS_CLIENT_KEY, MIDTRANS_IS_PRODUCTION]).await?;
        Ok(Self {
            server_key: map.remove(MIDTRANS_SERVER_KEY).unwrap_or_default(),
            client_key: map.remove(MIDTRANS_CLIENT_KEY).unwrap_or_default(),
            is_production: map.get(MIDTRANS_IS_PRODUCTION).is_some_and(|v| v == "true"),
        })
    }
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("server_key", &"[REDACTED]")
            .field("client_key", &self.client_key)
            .field("is_production", &self.is_production)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrinterSettings {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: u16,
}

impl PrinterSettings {
    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        let mut map = store.get_many(&[PRINTER_ENABLED, PRINTER_HOST, PRINTER_PORT]).await?;
        Ok(Self {
            enabled: map.get(PRINTER_ENABLED).is_some_and(|v| v == "true"),
            host: map.remove(PRINTER_HOST).filter(|h| !h.trim().is_empty()),
            port: map.get(PRINTER_PORT).and_then(|p| p.trim().parse().ok()).unwrap_or(DEFAULT_PRINTER_PORT),
        })
    }

    /// `host:port` when printing is switched on and a host is configured.
    pub fn target(&self) -> Option<(&str, u16)> {
        match (&self.host, self.enabled) {
            (Some(host), true) => Some((host.as_str(), self.port)),
            _ => None,
        }
    }
}

/// Admin WhatsApp recipients from the comma-separated `wa_admin_numbers`.
pub async fn admin_numbers(store: &dyn SettingsStore) -> Result<Vec<String>> {
    let map = store.get_many(&[WA_ADMIN_NUMBERS]).await?;
    Ok(map
        .get(WA_ADMIN_NUMBERS)
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default())
}

/// Every editable key with its stored value, empty when unset.
pub async fn all(store: &dyn SettingsStore) -> Result<BTreeMap<String, String>> {
    let mut stored = store.get_many(&KEYS).await?;
    Ok(KEYS.iter().map(|k| (k.to_string(), stored.remove(*k).unwrap_or_default())).collect())
}

/// Validates and writes an operator update. Unknown keys or malformed
/// values reject the whole update.
pub async fn update(store: &dyn SettingsStore, values: BTreeMap<String, String>) -> Result<usize> {
    let mut pairs = Vec::with_capacity(values.len());
    for (key, value) in values {
        let value = value.trim().to_string();
        match key.as_str() {
            MIDTRANS_IS_PRODUCTION | PRINTER_ENABLED if value != "true" && value != "false" => {
                return Err(PosError::Validation(format!("{key} must be true or false")));
            }
            PRINTER_PORT if !value.is_empty() && value.parse::<u16>().is_err() => {
                return Err(PosError::Validation(format!("{key} must be a port number")));
            }
            k if !KEYS.contains(&k) => return Err(PosError::Validation(format!("unknown setting '{key}'"))),
            _ => {}
        }
        pairs.push((key, value));
    }
    store.set_many(&pairs).await?;
    Ok(pairs.len())
}
