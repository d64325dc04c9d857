use chrono::{DateTime, Utc};
use mtb_schemas::{CommandEnvelope, CommandId, CommandState};
use serde::{Deserialize, Serialize};

/// One inbound request waiting for the polling client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub name: String,
    pub payload: String,
    pub created_at_utc: DateTime<Utc>,
    pub state: CommandState,
    /// Set once the polling client posts a response.
    pub response: Option<String>,
}

impl Command {
    pub(crate) fn new(name: &str, payload: &str) -> Self {
        Self {
            id: CommandId::new(),
            name: name.to_string(),
            payload: payload.to_string(),
            created_at_utc: Utc::now(),
            state: CommandState::Pending,
            response: None,
        }
    }

    /// The view handed to the polling client.
    pub fn envelope(&self) -> CommandEnvelope {
        CommandEnvelope {
            id: self.id,
            name: self.name.clone(),
            payload: self.payload.clone(),
            created_at_utc: self.created_at_utc,
        }
    }
}
