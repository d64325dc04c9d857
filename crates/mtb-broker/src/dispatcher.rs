//! Outbound event delivery to the registered callback URL.
//!
//! `raise` is fire-and-forget: the push runs on a detached task, failures
//! are logged and published as [`BrokerEvent::EventFailed`], nothing is
//! retried and the raiser never waits.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mtb_schemas::CallbackFormat;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::BrokerError;
use crate::events::BrokerEvent;

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// The single active callback. Re-registration replaces it; no history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRegistration {
    pub url: String,
    pub format: CallbackFormat,
}

impl CallbackRegistration {
    pub fn new(url: &str, format: &str) -> Result<Self, BrokerError> {
        let url = url.trim();
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| BrokerError::InvalidRequest(format!("callback url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BrokerError::InvalidRequest(format!(
                "callback url '{url}': scheme must be http or https"
            )));
        }
        let format =
            CallbackFormat::parse(format).map_err(|e| BrokerError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            format,
        })
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// One outbound push as handed to a transport.
#[derive(Clone)]
pub struct EventRequest {
    pub target: CallbackRegistration,
    pub payload: String,
    /// Credential attached as `Authorization: Bearer`.
    pub token: Option<String>,
    pub ts_millis: i64,
}

impl fmt::Debug for EventRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRequest")
            .field("target", &self.target)
            .field("payload", &self.payload)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("ts_millis", &self.ts_millis)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connect, DNS, TLS or timeout failure.
    Transport(String),
    /// The callback answered with a non-2xx status.
    Status { code: u16 },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Transport(msg) => write!(f, "transport error: {msg}"),
            DeliveryError::Status { code } => write!(f, "callback answered http {code}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Delivers one event. Object-safe so the dispatcher can hold
/// `Arc<dyn CallbackTransport>`; tests swap in recording doubles.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, req: &EventRequest) -> Result<(), DeliveryError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpCallbackTransport {
    http: reqwest::Client,
}

impl HttpCallbackTransport {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "callback client builder failed; using defaults");
                reqwest::Client::new()
            });
        Self { http }
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, req: &EventRequest) -> Result<(), DeliveryError> {
        let mut builder = self.http.post(&req.target.url);
        if let Some(token) = &req.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let ts = req.ts_millis.to_string();
        builder = match req.target.format {
            CallbackFormat::Json => builder.json(&serde_json::json!({
                "event": req.payload,
                "ts_millis": req.ts_millis,
            })),
            CallbackFormat::Form => {
                builder.form(&[("event", req.payload.as_str()), ("ts_millis", ts.as_str())])
            }
            CallbackFormat::Text => builder
                .header(CONTENT_TYPE, CallbackFormat::Text.content_type())
                .body(req.payload.clone()),
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                code: status.as_u16(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct EventDispatcher {
    registration: RwLock<Option<CallbackRegistration>>,
    transport: Arc<dyn CallbackTransport>,
    runtime: Handle,
    events: broadcast::Sender<BrokerEvent>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registration", &self.callback())
            .field("transport", &self.transport.name())
            .finish()
    }
}

impl EventDispatcher {
    /// `runtime` runs the detached delivery tasks, so raisers may call from
    /// threads outside it.
    pub fn new(
        transport: Arc<dyn CallbackTransport>,
        runtime: Handle,
        events: broadcast::Sender<BrokerEvent>,
    ) -> Self {
        Self {
            registration: RwLock::new(None),
            transport,
            runtime,
            events,
        }
    }

    /// Replace the active callback; `None` unregisters.
    pub fn set_callback(&self, registration: Option<CallbackRegistration>) {
        *self
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = registration;
    }

    pub fn callback(&self) -> Option<CallbackRegistration> {
        self.registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Push `payload` to the registered callback on a detached task.
    /// Returns whether a push was started; `false` when nothing is registered.
    pub fn raise(&self, payload: &str, token: Option<String>) -> bool {
        let Some(target) = self.callback() else {
            debug!("event raised with no callback registered; dropped");
            return false;
        };

        let req = EventRequest {
            target,
            payload: payload.to_string(),
            token,
            ts_millis: Utc::now().timestamp_millis(),
        };
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();

        self.runtime.spawn(async move {
            let url = req.target.url.clone();
            match transport.deliver(&req).await {
                Ok(()) => {
                    info!(url = %url, format = %req.target.format, "event delivered");
                    let _ = events.send(BrokerEvent::EventDelivered { url });
                }
                Err(e) => {
                    let err = BrokerError::DeliveryFailed(e.to_string());
                    warn!(url = %url, error = %err, "event delivery failed; not retried");
                    let _ = events.send(BrokerEvent::EventFailed {
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        });
        true
    }
}
