use mtb_schemas::CommandId;
use serde::{Deserialize, Serialize};

/// Broker lifecycle notifications, broadcast to any subscriber (the daemon
/// turns them into SSE). Sending never blocks and is dropped when nobody
/// listens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerEvent {
    Queued { command_id: CommandId, name: String },
    Taken { command_id: CommandId, name: String },
    Resolved { command_id: CommandId, name: String },
    TimedOut { command_id: CommandId, name: String },
    EventDelivered { url: String },
    EventFailed { url: String, reason: String },
    Drained { count: usize },
}

impl BrokerEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            BrokerEvent::Queued { .. } => "queued",
            BrokerEvent::Taken { .. } => "taken",
            BrokerEvent::Resolved { .. } => "resolved",
            BrokerEvent::TimedOut { .. } => "timed_out",
            BrokerEvent::EventDelivered { .. } => "event_delivered",
            BrokerEvent::EventFailed { .. } => "event_failed",
            BrokerEvent::Drained { .. } => "drained",
        }
    }
}
