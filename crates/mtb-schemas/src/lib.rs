//! mtb-schemas
//!
//! Wire types shared by the broker, the daemon and the CLI. No behaviour
//! lives here beyond parsing and formatting.

pub mod message;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use message::{MessageError, TerminalMessage};

// ---------------------------------------------------------------------------
// CommandId
// ---------------------------------------------------------------------------

/// Opaque, never-reused identity of one queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Allocate a fresh id (random v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CommandId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(CommandId)
    }
}

// ---------------------------------------------------------------------------
// CommandState
// ---------------------------------------------------------------------------

/// Lifecycle of a command from push to retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// Queued, not yet handed to the polling client.
    Pending,
    /// Handed to the polling client, awaiting its response.
    Taken,
    /// Response posted and delivered to the waiting caller.
    Resolved,
    /// Retired without a response.
    TimedOut,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Pending => "pending",
            CommandState::Taken => "taken",
            CommandState::Resolved => "resolved",
            CommandState::TimedOut => "timed_out",
        }
    }
}

// ---------------------------------------------------------------------------
// CallbackFormat
// ---------------------------------------------------------------------------

/// Body encoding used when pushing an event to the registered callback URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackFormat {
    Json,
    Form,
    Text,
}

impl CallbackFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackFormat::Json => "json",
            CallbackFormat::Form => "form",
            CallbackFormat::Text => "text",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            CallbackFormat::Json => "application/json",
            CallbackFormat::Form => "application/x-www-form-urlencoded",
            CallbackFormat::Text => "text/plain; charset=utf-8",
        }
    }

    /// Accepts the names the terminal scripts send (`json`, `form`,
    /// `urlencoded`, `text`, `plain`), case-insensitively. Empty means json.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "json" | "application/json" => Ok(CallbackFormat::Json),
            "form" | "urlencoded" | "application/x-www-form-urlencoded" => {
                Ok(CallbackFormat::Form)
            }
            "text" | "plain" | "text/plain" => Ok(CallbackFormat::Text),
            other => Err(anyhow!(
                "invalid callback format '{}'. expected one of: json | form | text",
                other
            )),
        }
    }
}

impl fmt::Display for CallbackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Poll surface bodies
// ---------------------------------------------------------------------------

/// A command as handed to the polling client by "take next".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: CommandId,
    pub name: String,
    pub payload: String,
    pub created_at_utc: DateTime<Utc>,
}

impl CommandEnvelope {
    /// Caret-delimited rendering for terminal scripts: `<id>^<name>^<payload>`.
    pub fn to_caret_line(&self) -> String {
        format!("{}^{}^{}", self.id, self.name, self.payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingResponse {
    pub pending: bool,
    pub pending_count: usize,
}

/// Body of `POST /poll/response`. `command` is either a command id or a
/// command name; a name binds to the oldest in-flight command with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostResponseRequest {
    pub command: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostResponseReply {
    pub resolved: bool,
    pub command_id: Option<CommandId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCallbackRequest {
    pub url: String,
    #[serde(default)]
    pub format: String,
}

/// Body of `POST /poll/auth-token`. An empty token clears the guard.
#[derive(Clone, Serialize, Deserialize)]
pub struct SetTokenRequest {
    pub token: String,
}

impl fmt::Debug for SetTokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetTokenRequest")
            .field("token", &"<REDACTED>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_format_parse() {
        assert_eq!(CallbackFormat::parse("JSON").unwrap(), CallbackFormat::Json);
        assert_eq!(CallbackFormat::parse("").unwrap(), CallbackFormat::Json);
        assert_eq!(CallbackFormat::parse("urlencoded").unwrap(), CallbackFormat::Form);
        assert_eq!(CallbackFormat::parse(" text ").unwrap(), CallbackFormat::Text);
        assert!(CallbackFormat::parse("xml").is_err());
    }

    #[test]
    fn command_id_parses_its_display() {
        let id = CommandId::new();
        let back: CommandId = id.to_string().parse().unwrap();
        assert_eq!(id, back);
        assert!("order.buy".parse::<CommandId>().is_err());
    }

    #[test]
    fn envelope_caret_line_keeps_payload_verbatim() {
        let env = CommandEnvelope {
            id: CommandId::new(),
            name: "order.buy".to_string(),
            payload: "{symbol:EURUSD}".to_string(),
            created_at_utc: Utc::now(),
        };
        let line = env.to_caret_line();
        assert!(line.ends_with("^order.buy^{symbol:EURUSD}"));
        assert!(line.starts_with(&env.id.to_string()));
    }

    #[test]
    fn command_state_serializes_snake_case() {
        let s = serde_json::to_string(&CommandState::TimedOut).unwrap();
        assert_eq!(s, "\"timed_out\"");
    }
}
