//! Shared runtime state for mtb-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The broker itself is
//! owned here as an `Arc<Controller>`; this module only adds the daemon's own
//! plumbing around it (SSE bus, build info, shutdown signal).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mtb_broker::{
    BrokerEvent, CallbackRegistration, Controller, ControllerSettings, HttpCallbackTransport,
};
use mtb_config::{BridgeConfig, LoadedConfig, ResolvedSecrets};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::warn;

use crate::routes::check_mounts;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Broker { event: BrokerEvent },
    LogLine { level: String, msg: String },
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Broker { event } => event.name(),
            BusMsg::LogLine { .. } => "log",
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo / RouteSettings
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Where the API and its route index are mounted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteSettings {
    pub base_path: String,
    pub docs_path: String,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            base_path: "/v1".to_string(),
            docs_path: "/v1/docs".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub controller: Arc<Controller>,
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub routes: RouteSettings,
    /// Hash of the effective config, when booted from one.
    pub config_hash: Option<String>,
    started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub fn new(controller: Arc<Controller>, routes: RouteSettings) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            controller,
            bus,
            build: BuildInfo {
                service: "mtb-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            routes,
            config_hash: None,
            started_at: Instant::now(),
            shutdown_tx,
        }
    }

    /// Seconds since this state was built, i.e. since daemon boot.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Build the broker from validated config and resolved secrets.
    /// Must run inside the tokio runtime.
    pub fn from_config(
        cfg: &BridgeConfig,
        loaded: Option<&LoadedConfig>,
        secrets: &ResolvedSecrets,
    ) -> Result<Self> {
        let routes = RouteSettings {
            base_path: cfg.listener.base_path.clone(),
            docs_path: cfg.listener.docs_path.clone(),
        };
        check_mounts(&routes).context("CONFIG_INVALID listener.docs_path")?;

        let initial_callback = match &cfg.callback.url {
            Some(url) => Some(
                CallbackRegistration::new(url, &cfg.callback.format)
                    .context("CONFIG_INVALID callback")?,
            ),
            None => None,
        };

        let settings = ControllerSettings {
            command_wait_timeout: cfg.broker.command_wait_timeout(),
            max_poll_wait: cfg.broker.max_poll_wait(),
            guard_inbound_commands: cfg.auth.guard_inbound_commands,
            initial_token: secrets.auth_token.clone(),
            initial_callback,
        };
        if settings.guard_inbound_commands && settings.initial_token.is_none() {
            warn!("auth.guard_inbound_commands is set but no token is configured; routes stay open until one is set");
        }

        let transport = Arc::new(HttpCallbackTransport::new(cfg.callback.delivery_timeout()));
        let controller = Arc::new(Controller::new(settings, transport)?);

        let mut st = Self::new(controller, routes);
        st.config_hash = loaded.map(|l| l.config_hash.clone());
        Ok(st)
    }

    /// Drain the broker and tell long-lived responses (SSE) to finish.
    /// Returns how many commands were drained.
    pub fn begin_shutdown(&self) -> usize {
        let drained = self.controller.shutdown();
        self.shutdown_tx.send_replace(true);
        let _ = self.bus.send(BusMsg::LogLine {
            level: "INFO".to_string(),
            msg: format!("daemon shutting down; {drained} command(s) drained"),
        });
        drained
    }

    /// Resolves once [`begin_shutdown`](Self::begin_shutdown) has run.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            // A dropped sender also ends the wait.
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn a background task that relays broker events onto the SSE bus.
/// Ends when the controller's event channel closes.
pub fn spawn_broker_relay(state: &AppState) {
    let mut events = state.controller.subscribe();
    let bus = state.bus.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = bus.send(BusMsg::Broker { event });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE relay lagged behind broker events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
