//! HTTP surface: storefront, order polling, payment webhook, admin WhatsApp and settings.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use validator::Validate;

use crate::coordinator::{Coordinator, NewOrder};
use crate::domain::aggregates::CartLine;
use crate::fanout::WhatsAppSession;
use crate::settings;
use crate::store::SettingsStore;
use crate::{OrderDetail, PosError, Product};

const QR_WAIT: Duration = Duration::from_secs(20);
const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub settings: Arc<dyn SettingsStore>,
    pub whatsapp: Arc<WhatsAppSession>,
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/adm/wa/login", get(wa_login))
        .route("/adm/wa/status", get(wa_status))
        .route("/adm/settings", get(list_settings).post(update_settings))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "qris-pos"})) }))
        .route("/products", get(list_products))
        .route("/order/create", post(create_order))
        .route("/o/status/:order_id", get(order_status))
        .route("/o/:order_id", get(order_view))
        .route("/midtrans/notification", post(payment_notification))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for PosError {
    fn into_response(self) -> Response {
        let status = match &self {
            PosError::EmptyCart | PosError::ProductNotFound(_) | PosError::InvalidPhone(_) | PosError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            PosError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            PosError::InvalidSignature => StatusCode::FORBIDDEN,
            PosError::Gateway(_) => StatusCode::BAD_GATEWAY,
            PosError::OrderIdExhausted(_) | PosError::Database(_) | PosError::Fanout(_) | PosError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let message = match &self {
            PosError::Database(_) => "Database operation failed".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({"ok": false, "error": message}))).into_response()
    }
}

/// `Json` extractor whose rejections answer with the `{ok:false,error}` body.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PosError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| PosError::Validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

async fn list_products(State(s): State<AppState>) -> Result<Json<Vec<Product>>, PosError> {
    Ok(Json(s.coordinator.list_products().await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<CartLine>,
    #[validate(length(max = 100))]
    pub customer_name: Option<String>,
    #[validate(length(max = 32))]
    pub customer_phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub ok: bool,
    pub order_id: String,
    pub gross_amount: i64,
    #[serde(rename = "qrUrl")]
    pub qr_url: Option<String>,
}

async fn create_order(State(s): State<AppState>, JsonBody(r): JsonBody<CreateOrderRequest>) -> Result<Json<CreateOrderResponse>, PosError> {
    r.validate().map_err(|e| PosError::Validation(e.to_string()))?;
    let created = s
        .coordinator
        .create_order(NewOrder { items: r.items, customer_name: r.customer_name, customer_phone: r.customer_phone })
        .await?;
    Ok(Json(CreateOrderResponse {
        ok: true,
        order_id: created.order_id.to_string(),
        gross_amount: created.gross_amount,
        qr_url: created.payment_url,
    }))
}

async fn order_status(State(s): State<AppState>, Path(order_id): Path<String>) -> Response {
    match s.coordinator.order_status(&order_id).await {
        Ok(status) => Json(json!({"ok": true, "status": status})).into_response(),
        Err(PosError::OrderNotFound(_)) => (StatusCode::NOT_FOUND, Json(json!({"ok": false, "error": "Not found"}))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn order_view(State(s): State<AppState>, Path(order_id): Path<String>) -> Result<Json<OrderDetail>, PosError> {
    Ok(Json(s.coordinator.order_detail(&order_id).await?))
}

/// Gateway webhook; plain-text acknowledgement the gateway retries on.
async fn payment_notification(State(s): State<AppState>, Json(payload): Json<Value>) -> (StatusCode, &'static str) {
    match s.coordinator.handle_notification(payload).await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(PosError::InvalidSignature) => (StatusCode::FORBIDDEN, "Invalid signature"),
        Err(e) => {
            error!(error = %e, "payment notification failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "ERROR")
        }
    }
}

async fn require_admin(State(s): State<AppState>, headers: HeaderMap, request: Request, next: Next) -> Response {
    let supplied = headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok());
    match (s.admin_token.as_deref(), supplied) {
        (Some(expected), Some(given)) if expected == given => next.run(request).await,
        _ => (StatusCode::FORBIDDEN, Json(json!({"ok": false, "error": "Forbidden"}))).into_response(),
    }
}

async fn wa_login(State(s): State<AppState>) -> Result<Json<Value>, PosError> {
    let wa = &s.whatsapp;
    if wa.is_ready() {
        return Ok(Json(json!({"ok": true, "ready": true, "message": "WhatsApp sudah terhubung"})));
    }
    wa.start_login().await?;
    if let Some(qr) = wa.current_qr() {
        return Ok(Json(json!({"ok": true, "qr": qr})));
    }
    match wa.wait_for_qr(QR_WAIT).await? {
        Some(qr) => Ok(Json(json!({"ok": true, "qr": qr}))),
        None => Ok(Json(json!({"ok": true, "ready": true, "message": "WhatsApp sudah terhubung"}))),
    }
}

async fn wa_status(State(s): State<AppState>) -> Json<Value> {
    let state = s.whatsapp.state();
    Json(json!({"ok": true, "ready": state.ready, "qr": state.qr}))
}

async fn list_settings(State(s): State<AppState>) -> Result<Json<Value>, PosError> {
    let values = settings::all(s.settings.as_ref()).await?;
    Ok(Json(json!({"ok": true, "settings": values})))
}

/// Upserts the posted keys; numbers and booleans are stored as their text.
async fn update_settings(State(s): State<AppState>, JsonBody(body): JsonBody<BTreeMap<String, Value>>) -> Result<Json<Value>, PosError> {
    let mut values = BTreeMap::new();
    for (key, value) in body {
        let text = match value {
            Value::String(v) => v,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            _ => return Err(PosError::Validation(format!("{key} must be a string"))),
        };
        values.insert(key, text);
    }
    let updated = settings::update(s.settings.as_ref(), values).await?;
    info!(updated, "settings updated");
    Ok(Json(json!({"ok": true, "updated": updated})))
}
