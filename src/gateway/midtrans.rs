//! Midtrans Core API client.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{ChargeRequest, ChargeResponse, GatewayError, PaymentGateway};
use crate::settings::GatewayCredentials;

const SANDBOX_BASE_URL: &str = "https://api.sandbox.midtrans.com";
const PRODUCTION_BASE_URL: &str = "https://api.midtrans.com";

#[derive(Clone, Debug)]
pub struct MidtransClient {
    http: reqwest::Client,
    base_url_override: Option<String>,
}

impl MidtransClient {
    pub fn new(timeout: Duration, base_url_override: Option<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url_override })
    }

    fn base_url(&self, credentials: &GatewayCredentials) -> &str {
        match &self.base_url_override {
            Some(url) => url.trim_end_matches('/'),
            None if credentials.is_production => PRODUCTION_BASE_URL,
            None => SANDBOX_BASE_URL,
        }
    }
}

#[async_trait]
impl PaymentGateway for MidtransClient {
    #[instrument(skip_all, fields(order_id = %request.transaction_details.order_id, production = credentials.is_production))]
    async fn charge(&self, credentials: &GatewayCredentials, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        if credentials.server_key.is_empty() {
            return Err(GatewayError::MissingCredentials);
        }
        let url = format!("{}/v2/charge", self.base_url(credentials));
        let resp = self
            .http
            .post(&url)
            .basic_auth(&credentials.server_key, Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let http_status = resp.status();
        let raw: serde_json::Value = resp.json().await?;
        debug!(%http_status, "charge response received");
        let charge = ChargeResponse::from_json(raw)?;

        // Midtrans reports failures in the body `status_code`, often with HTTP 200.
        let body_status = charge.status_code.clone().unwrap_or_else(|| http_status.as_u16().to_string());
        if !http_status.is_success() || !body_status.starts_with('2') {
            return Err(GatewayError::Rejected {
                status_code: body_status,
                message: charge.status_message.clone().unwrap_or_else(|| "charge rejected".into()),
            });
        }
        Ok(charge)
    }
}
