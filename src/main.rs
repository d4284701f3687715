//! QRIS POS - storefront orders, QRIS charge and payment webhook

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qris_pos::api::{self, AppState};
use qris_pos::config::AppConfig;
use qris_pos::fanout::{EscPosPrinter, Fanout, HttpBridgeTransport, NatsPublisher, WhatsAppSession};
use qris_pos::gateway::MidtransClient;
use qris_pos::store::{MemorySettingsStore, MemoryStore, OrderStore, PgSettingsStore, PgStore, SettingsStore};
use qris_pos::Coordinator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let in_memory = std::env::args().any(|a| a == "--memory");

    let (store, settings): (Arc<dyn OrderStore>, Arc<dyn SettingsStore>) = if in_memory {
        tracing::warn!("running with in-memory storage, data is lost on exit");
        (Arc::new(MemoryStore::new()), Arc::new(MemorySettingsStore::new()))
    } else {
        let url = config.database_url.as_deref().context("DATABASE_URL must be set (or pass --memory)")?;
        let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
        sqlx::migrate!("./migrations").run(&db).await?;
        (Arc::new(PgStore::new(db.clone())), Arc::new(PgSettingsStore::new(db)))
    };

    let whatsapp = Arc::new(match &config.wa_bridge_url {
        Some(url) => WhatsAppSession::new(Arc::new(HttpBridgeTransport::new(url, config.fanout_timeout)?)),
        None => {
            tracing::info!("WA_BRIDGE_URL not set, WhatsApp notifications disabled");
            WhatsAppSession::offline()
        }
    });

    let mut fanout = Fanout::new(
        settings.clone(),
        Arc::new(EscPosPrinter::new(settings.clone())),
        whatsapp.clone(),
        config.shop.clone(),
        config.app_url.clone(),
        config.fanout_timeout,
    );
    if let Some(url) = &config.nats_url {
        match async_nats::connect(url.as_str()).await {
            Ok(client) => fanout = fanout.with_events(Arc::new(NatsPublisher::new(client))),
            Err(e) => tracing::warn!(error = %e, "NATS unavailable, order events disabled"),
        }
    }

    let gateway = Arc::new(MidtransClient::new(config.gateway_timeout, config.midtrans_base_url.clone())?);
    let coordinator = Arc::new(Coordinator::new(store, settings.clone(), gateway, fanout, config.gateway_timeout));
    let state = AppState { coordinator, settings, whatsapp, admin_token: config.admin_token.clone() };

    let app = api::router(state);
    tracing::info!("🚀 QRIS POS listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
