//! Request and response types for the mtb-daemon HTTP endpoints that are
//! not already shared through `mtb-schemas`.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use mtb_broker::BrokerStatus;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /health  /status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub service: String,
    pub daemon_uptime_secs: u64,
    pub config_hash: Option<String>,
    #[serde(flatten)]
    pub broker: BrokerStatus,
}

// ---------------------------------------------------------------------------
// Error body
// ---------------------------------------------------------------------------

/// Body of every non-2xx answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine kind: "timeout" | "unauthorized" | "invalid_request" | ...
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Polling surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingQuery {
    /// Long-poll window; absent or 0 answers immediately.
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TakeQuery {
    /// `text` renders the command as a caret line instead of JSON.
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub registered: bool,
    pub url: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    /// False when no callback is registered and the event was dropped.
    pub dispatched: bool,
}

// ---------------------------------------------------------------------------
// Route index (docs_path)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDoc {
    pub method: String,
    pub path: String,
    /// "none" | "token" | "optional"
    pub auth: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteIndex {
    pub service: String,
    pub version: String,
    pub base_path: String,
    pub routes: Vec<RouteDoc>,
}
