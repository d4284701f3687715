//! Process configuration from the environment.
//!
//! Gateway credentials, printer address and admin WhatsApp numbers are not
//! here: they live in the `settings` table and are read per use.

use std::env;
use std::time::Duration;

use crate::fanout::ShopInfo;
use crate::{PosError, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub port: u16,
    pub app_url: String,
    pub admin_token: Option<String>,
    pub shop: ShopInfo,
    pub gateway_timeout: Duration,
    pub fanout_timeout: Duration,
    pub midtrans_base_url: Option<String>,
    pub wa_bridge_url: Option<String>,
    pub nats_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: u64| -> Result<Duration> {
            get(key)
                .map(|v| v.parse::<u64>().map_err(|e| PosError::Config(format!("invalid {key}: {e}"))))
                .transpose()
                .map(|v| Duration::from_secs(v.unwrap_or(default)))
        };

        let port = get("PORT")
            .map(|p| p.parse::<u16>().map_err(|e| PosError::Config(format!("invalid PORT: {e}"))))
            .transpose()?
            .unwrap_or(3000);

        Ok(Self {
            database_url: get("DATABASE_URL"),
            port,
            app_url: get("APP_URL").unwrap_or_else(|| format!("http://localhost:{port}")),
            admin_token: get("ADMIN_TOKEN"),
            shop: ShopInfo {
                name: get("SHOP_NAME").unwrap_or_else(|| "TOKO CONTOH".into()),
                address: get("SHOP_ADDRESS").unwrap_or_else(|| "Jl. Mawar No.1".into()),
                phone: get("SHOP_PHONE").unwrap_or_else(|| "0812-0000-0000".into()),
            },
            gateway_timeout: secs("GATEWAY_TIMEOUT_SECS", 20)?,
            fanout_timeout: secs("FANOUT_TIMEOUT_SECS", 10)?,
            midtrans_base_url: get("MIDTRANS_BASE_URL"),
            wa_bridge_url: get("WA_BRIDGE_URL"),
            nats_url: get("NATS_URL"),
        })
    }
}
