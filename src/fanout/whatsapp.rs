//! WhatsApp session manager.
//!
//! One `WhatsAppSession` owns the connection to a WhatsApp transport and
//! publishes its state (ready flag, current login QR) through a `watch`
//! channel. Callers never see how the connection is kept alive; they only
//! start a login, read the state, or send.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{FanoutError, Messenger};
use crate::domain::value_objects::PhoneNumber;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Qr(String),
    Open,
    Closed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub ready: bool,
    pub qr: Option<String>,
}

impl SessionState {
    fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Qr(qr) => self.qr = Some(qr),
            SessionEvent::Open => {
                self.ready = true;
                self.qr = None;
            }
            SessionEvent::Closed => self.ready = false,
        }
    }
}

/// A connection to WhatsApp that reports login progress as events.
#[async_trait]
pub trait WaTransport: Send + Sync {
    /// Starts (or resumes) a login; progress is pushed into `events` until it closes.
    async fn connect(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), FanoutError>;

    async fn send(&self, jid: &str, text: &str) -> Result<(), FanoutError>;
}

pub struct WhatsAppSession {
    transport: Option<Arc<dyn WaTransport>>,
    state: Arc<watch::Sender<SessionState>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WhatsAppSession {
    pub fn new(transport: Arc<dyn WaTransport>) -> Self {
        Self::build(Some(transport))
    }

    /// Session with no transport: never ready, every send fails.
    pub fn offline() -> Self {
        Self::build(None)
    }

    fn build(transport: Option<Arc<dyn WaTransport>>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self { transport, state: Arc::new(state), pump: Mutex::new(None) }
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().ready
    }

    pub fn current_qr(&self) -> Option<String> {
        self.state.borrow().qr.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Live state subscribers; `wait_for_qr` never leaves one behind.
    pub fn subscriber_count(&self) -> usize {
        self.state.receiver_count()
    }

    /// Starts a login unless one is already running.
    #[instrument(skip_all)]
    pub async fn start_login(&self) -> Result<(), FanoutError> {
        let transport = self.transport.clone().ok_or(FanoutError::NotConfigured)?;
        let (tx, mut rx) = mpsc::channel(16);
        {
            let mut pump = self.pump.lock().unwrap_or_else(|e| e.into_inner());
            if pump.as_ref().is_some_and(|h| !h.is_finished()) {
                debug!("login already in progress");
                return Ok(());
            }
            let state = self.state.clone();
            *pump = Some(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    debug!(?event, "session event");
                    state.send_modify(|s| s.apply(event));
                }
                state.send_modify(|s| s.apply(SessionEvent::Closed));
            }));
        }
        transport.connect(tx).await?;
        info!("WhatsApp login started");
        Ok(())
    }

    /// Waits for a login QR (or readiness) for at most `timeout`.
    ///
    /// Returns `Ok(None)` once the session is ready. The subscription is
    /// dropped on every exit path, timeout included.
    pub async fn wait_for_qr(&self, timeout: Duration) -> Result<Option<String>, FanoutError> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.ready || s.qr.is_some())).await;
        match waited {
            Ok(Ok(state)) if state.ready => Ok(None),
            Ok(Ok(state)) => Ok(state.qr.clone()),
            Ok(Err(_)) => Err(FanoutError::NotReady),
            Err(_) => Err(FanoutError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl Messenger for WhatsAppSession {
    async fn send_text(&self, recipient: &str, message: &str) -> Result<(), FanoutError> {
        let phone = PhoneNumber::parse(recipient).map_err(|_| FanoutError::InvalidRecipient(recipient.to_string()))?;
        let transport = self.transport.as_ref().ok_or(FanoutError::NotConfigured)?;
        if !self.is_ready() {
            return Err(FanoutError::NotReady);
        }
        transport.send(&phone.jid(), message).await
    }
}

#[derive(Debug, Deserialize)]
struct BridgeStatus {
    #[serde(default)]
    connected: bool,
    qr: Option<String>,
}

/// Transport backed by an HTTP WhatsApp bridge exposing
/// `POST /session/start`, `GET /session/status` and `POST /messages`.
pub struct HttpBridgeTransport {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpBridgeTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FanoutError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), poll_interval: Duration::from_secs(2) })
    }
}

#[async_trait]
impl WaTransport for HttpBridgeTransport {
    async fn connect(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), FanoutError> {
        self.http.post(format!("{}/session/start", self.base_url)).send().await?.error_for_status()?;

        let http = self.http.clone();
        let url = format!("{}/session/status", self.base_url);
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut last: Option<SessionEvent> = None;
            loop {
                let status = match http.get(&url).send().await {
                    Ok(resp) => resp.json::<BridgeStatus>().await,
                    Err(e) => Err(e),
                };
                let event = match status {
                    Ok(BridgeStatus { connected: true, .. }) => Some(SessionEvent::Open),
                    Ok(BridgeStatus { qr: Some(qr), .. }) => Some(SessionEvent::Qr(qr)),
                    Ok(_) if last == Some(SessionEvent::Open) => Some(SessionEvent::Closed),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "WhatsApp bridge status poll failed");
                        None
                    }
                };
                if let Some(event) = event.filter(|e| last.as_ref() != Some(e)) {
                    if events.send(event.clone()).await.is_err() {
                        break;
                    }
                    last = Some(event);
                }
                if last == Some(SessionEvent::Closed) {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
        Ok(())
    }

    async fn send(&self, jid: &str, text: &str) -> Result<(), FanoutError> {
        self.http
            .post(format!("{}/messages", self.base_url))
            .json(&serde_json::json!({ "jid": jid, "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
