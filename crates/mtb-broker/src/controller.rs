//! Controller: the only component that sees both sides of the bridge.
//!
//! Inbound HTTP handlers call [`Controller::handle_inbound_request`]; the
//! polling client drives the `poll_*` / `post_*` / `set_*` / `raise_*`
//! surface. Every polling-side entry point checks the auth token before it
//! touches any state, so a rejected call never mutates the queue.
//!
//! The controller is an ordinary value. Build as many as needed (tests do);
//! the daemon owns one behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mtb_schemas::{CommandEnvelope, CommandId};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::AuthToken;
use crate::dispatcher::{CallbackRegistration, CallbackTransport, EventDispatcher};
use crate::error::BrokerError;
use crate::events::BrokerEvent;
use crate::gate::WaitOutcome;
use crate::queue::{CommandQueue, Enqueued};

const EVENT_BUS_CAPACITY: usize = 256;

/// Startup values; immutable for the controller's lifetime.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Uniform bound applied to every inbound request.
    pub command_wait_timeout: Duration,
    /// Cap on long-poll waits requested by the polling client.
    pub max_poll_wait: Duration,
    /// Also require the token on inbound command routes.
    pub guard_inbound_commands: bool,
    pub initial_token: Option<String>,
    pub initial_callback: Option<CallbackRegistration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            command_wait_timeout: Duration::from_millis(30_000),
            max_poll_wait: Duration::from_millis(10_000),
            guard_inbound_commands: false,
            initial_token: None,
            initial_callback: None,
        }
    }
}

/// Point-in-time view for `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStatus {
    pub pending: usize,
    pub inflight: usize,
    pub callback_url: Option<String>,
    pub token_configured: bool,
    pub draining: bool,
}

#[derive(Debug)]
pub struct Controller {
    settings: ControllerSettings,
    queue: CommandQueue,
    auth: AuthToken,
    dispatcher: EventDispatcher,
    events: broadcast::Sender<BrokerEvent>,
}

impl Controller {
    /// Must be called from inside a tokio runtime; callback deliveries are
    /// spawned onto it.
    pub fn new(settings: ControllerSettings, transport: Arc<dyn CallbackTransport>) -> Result<Self> {
        let runtime =
            Handle::try_current().context("controller must be constructed inside a tokio runtime")?;
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        let dispatcher = EventDispatcher::new(transport, runtime, events.clone());
        dispatcher.set_callback(settings.initial_callback.clone());

        Ok(Self {
            auth: AuthToken::new(settings.initial_token.clone()),
            settings,
            queue: CommandQueue::new(),
            dispatcher,
            events,
        })
    }

    pub fn command_wait_timeout(&self) -> Duration {
        self.settings.command_wait_timeout
    }

    pub fn max_poll_wait(&self) -> Duration {
        self.settings.max_poll_wait
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: BrokerEvent) {
        // No subscribers is the normal case outside the daemon.
        let _ = self.events.send(event);
    }

    pub fn authorize(&self, presented: Option<&str>) -> Result<(), BrokerError> {
        self.auth.check(presented).inspect_err(|_| {
            warn!("rejected call with missing or mismatched auth token");
        })
    }

    /// Token check for inbound command routes; a no-op unless
    /// `guard_inbound_commands` is set.
    pub fn authorize_inbound(&self, presented: Option<&str>) -> Result<(), BrokerError> {
        if self.settings.guard_inbound_commands {
            self.authorize(presented)
        } else {
            Ok(())
        }
    }

    // ---------------------------------------------------------------------
    // Inbound side
    // ---------------------------------------------------------------------

    /// Queue `name`/`payload` and suspend until the polling client answers,
    /// the broker drains, or `timeout` passes.
    pub async fn handle_inbound_request(
        &self,
        name: &str,
        payload: &str,
        timeout: Duration,
    ) -> Result<String, BrokerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BrokerError::InvalidRequest(
                "command name must not be empty".to_string(),
            ));
        }

        let Enqueued { command, gate } = self.queue.push(name, payload)?;
        debug!(command_id = %command.id, name = %command.name, "command queued");
        self.publish(BrokerEvent::Queued {
            command_id: command.id,
            name: command.name.clone(),
        });

        match gate.wait(timeout).await {
            WaitOutcome::Resolved(response) => Ok(response),
            WaitOutcome::TimedOut => {
                let waited_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                info!(command_id = %command.id, name = %command.name, waited_ms, "command timed out");
                self.publish(BrokerEvent::TimedOut {
                    command_id: command.id,
                    name: command.name,
                });
                Err(BrokerError::Timeout {
                    command_id: command.id,
                    waited_ms,
                })
            }
            WaitOutcome::ShuttingDown => Err(BrokerError::ShuttingDown),
        }
    }

    // ---------------------------------------------------------------------
    // Polling-client side
    // ---------------------------------------------------------------------

    pub fn poll_has_command(&self, presented: Option<&str>) -> Result<bool, BrokerError> {
        self.authorize(presented)?;
        Ok(self.queue.has_pending())
    }

    /// Long-poll: `max_wait` is capped at the configured maximum.
    pub async fn poll_wait_for_command(
        &self,
        presented: Option<&str>,
        max_wait: Duration,
    ) -> Result<bool, BrokerError> {
        self.authorize(presented)?;
        let max_wait = max_wait.min(self.settings.max_poll_wait);
        Ok(self.queue.wait_for_pending(max_wait).await)
    }

    pub fn poll_take_command(
        &self,
        presented: Option<&str>,
    ) -> Result<Option<CommandEnvelope>, BrokerError> {
        self.authorize(presented)?;
        let Some(command) = self.queue.take_next() else {
            return Ok(None);
        };
        debug!(command_id = %command.id, name = %command.name, "command taken");
        self.publish(BrokerEvent::Taken {
            command_id: command.id,
            name: command.name.clone(),
        });
        Ok(Some(command.envelope()))
    }

    /// Resolve by id, or by name as an alias for the oldest in-flight command
    /// carrying it. An unknown target is benign: logged, `Ok(None)`.
    pub fn post_command_response(
        &self,
        presented: Option<&str>,
        name_or_id: &str,
        response: &str,
    ) -> Result<Option<CommandId>, BrokerError> {
        self.authorize(presented)?;
        let key = name_or_id.trim();
        if key.is_empty() {
            return Err(BrokerError::InvalidRequest(
                "command id or name must not be empty".to_string(),
            ));
        }

        let resolved = match key.parse::<CommandId>() {
            Ok(id) => self.queue.resolve(id, response),
            Err(_) => self.queue.resolve_by_name(key, response),
        };

        match resolved {
            Ok(command) => {
                debug!(command_id = %command.id, name = %command.name, "command resolved");
                self.publish(BrokerEvent::Resolved {
                    command_id: command.id,
                    name: command.name,
                });
                Ok(Some(command.id))
            }
            Err(BrokerError::NotFound(what)) => {
                warn!(target_key = %what, "response for unknown or retired command ignored");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Register (or with an empty `url`, clear) the callback.
    pub fn set_callback(
        &self,
        presented: Option<&str>,
        url: &str,
        format: &str,
    ) -> Result<Option<CallbackRegistration>, BrokerError> {
        self.authorize(presented)?;
        if url.trim().is_empty() {
            self.dispatcher.set_callback(None);
            info!("callback cleared");
            return Ok(None);
        }
        let registration = CallbackRegistration::new(url, format)?;
        info!(url = %registration.url, format = %registration.format, "callback registered");
        self.dispatcher.set_callback(Some(registration.clone()));
        Ok(Some(registration))
    }

    pub fn callback(&self) -> Option<CallbackRegistration> {
        self.dispatcher.callback()
    }

    /// Fire-and-forget push to the registered callback. `Ok(false)` when none
    /// is registered.
    pub fn raise_event(&self, presented: Option<&str>, payload: &str) -> Result<bool, BrokerError> {
        self.authorize(presented)?;
        Ok(self.dispatcher.raise(payload, self.auth.current()))
    }

    /// Replace the process-wide token. Requires the current one; a blank
    /// token removes the guard.
    pub fn set_auth_token(&self, presented: Option<&str>, token: &str) -> Result<(), BrokerError> {
        self.authorize(presented)?;
        self.auth.replace(Some(token.to_string()));
        if self.auth.is_configured() {
            info!("auth token replaced");
        } else {
            info!("auth token cleared; polling surface is unguarded");
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub fn status(&self) -> BrokerStatus {
        BrokerStatus {
            pending: self.queue.pending_count(),
            inflight: self.queue.inflight_count(),
            callback_url: self.dispatcher.callback().map(|c| c.url),
            token_configured: self.auth.is_configured(),
            draining: self.queue.is_closed(),
        }
    }

    /// Reject further commands and release every waiting handler with
    /// `ShuttingDown`. Idempotent; returns how many commands were drained.
    pub fn shutdown(&self) -> usize {
        let count = self.queue.close();
        info!(count, "broker drained");
        self.publish(BrokerEvent::Drained { count });
        count
    }
}
