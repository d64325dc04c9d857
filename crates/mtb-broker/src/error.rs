use mtb_schemas::CommandId;

/// Every failure the broker reports across its boundary.
///
/// Implements `std::error::Error` so callers can box it or wrap it in
/// `anyhow` without extra glue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No response arrived within the configured window.
    Timeout { command_id: CommandId, waited_ms: u64 },
    /// A token is configured and the caller presented a different one, or none.
    Unauthorized,
    /// Unknown, already resolved or already retired command.
    NotFound(String),
    /// A callback push failed. Logged by the dispatcher, never returned to a raiser.
    DeliveryFailed(String),
    /// Malformed input (empty command name, bad callback URL or format).
    InvalidRequest(String),
    /// The broker is draining; no new commands are accepted.
    ShuttingDown,
}

impl BrokerError {
    /// Stable machine-readable kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Timeout { .. } => "timeout",
            BrokerError::Unauthorized => "unauthorized",
            BrokerError::NotFound(_) => "not_found",
            BrokerError::DeliveryFailed(_) => "delivery_failed",
            BrokerError::InvalidRequest(_) => "invalid_request",
            BrokerError::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Timeout {
                command_id,
                waited_ms,
            } => write!(
                f,
                "TIMEOUT: no response for command {command_id} within {waited_ms}ms"
            ),
            BrokerError::Unauthorized => write!(f, "UNAUTHORIZED: missing or invalid auth token"),
            BrokerError::NotFound(what) => write!(f, "NOT_FOUND: no in-flight command {what}"),
            BrokerError::DeliveryFailed(why) => write!(f, "DELIVERY_FAILED: {why}"),
            BrokerError::InvalidRequest(why) => write!(f, "INVALID_REQUEST: {why}"),
            BrokerError::ShuttingDown => write!(f, "SHUTTING_DOWN: broker is draining"),
        }
    }
}

impl std::error::Error for BrokerError {}
