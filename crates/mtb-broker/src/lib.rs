//! mtb-broker
//!
//! Request/response bridge between synchronous HTTP callers and a polling
//! client that cannot accept inbound connections (a trading terminal plugin).
//!
//! Inbound requests become [`Command`]s on a FIFO [`CommandQueue`]; each
//! caller suspends on its own [`WaitGate`] until the polling client posts a
//! response, the configured timeout passes, or the broker drains. The polling
//! client can also push events outward through the [`EventDispatcher`].
//! [`Controller`] ties it together and enforces the auth token.

mod auth;
mod command;
mod controller;
mod dispatcher;
mod error;
mod events;
mod gate;
mod queue;

pub use auth::AuthToken;
pub use command::Command;
pub use controller::{BrokerStatus, Controller, ControllerSettings};
pub use dispatcher::{
    CallbackRegistration, CallbackTransport, DeliveryError, EventDispatcher, EventRequest,
    HttpCallbackTransport,
};
pub use error::BrokerError;
pub use events::BrokerEvent;
pub use gate::{WaitGate, WaitOutcome};
pub use queue::{CommandQueue, Enqueued};
