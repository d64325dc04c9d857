//! Per-command wait gate.
//!
//! A gate is a oneshot channel split in two: the [`GateSignal`] travels with
//! the queue entry, the [`WaitGate`] stays with the HTTP handler. Every path
//! that removes an entry from the queue (resolve, timeout retirement,
//! shutdown drain) does so under the queue lock, and resolve/drain send on
//! the signal before releasing it. A waiter whose timer fires therefore
//! either retires the entry itself (timed out) or finds the delivery already
//! sitting in its receiver (resolved). Never both, never neither.

use std::time::Duration;

use mtb_schemas::CommandId;
use tokio::sync::oneshot;

use crate::queue::CommandQueue;

/// What travels from the resolving side to the waiter.
#[derive(Debug)]
pub(crate) enum Delivery {
    Response(String),
    Shutdown,
}

/// Result of [`WaitGate::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Resolved(String),
    TimedOut,
    ShuttingDown,
}

impl From<Delivery> for WaitOutcome {
    fn from(d: Delivery) -> Self {
        match d {
            Delivery::Response(r) => WaitOutcome::Resolved(r),
            Delivery::Shutdown => WaitOutcome::ShuttingDown,
        }
    }
}

/// Sending half, owned by the queue entry.
#[derive(Debug)]
pub(crate) struct GateSignal {
    tx: oneshot::Sender<Delivery>,
}

impl GateSignal {
    /// Hand `delivery` to the waiter. Returns `false` when the waiter is gone,
    /// which is harmless: its gate already retired.
    pub(crate) fn signal(self, delivery: Delivery) -> bool {
        self.tx.send(delivery).is_ok()
    }
}

/// Receiving half, owned by the thread that pushed the command.
///
/// Dropping an unfinished gate (e.g. the HTTP client hung up) retires the
/// command so the polling client never sees it, or, if already taken, so a
/// late response finds nothing to resolve.
#[derive(Debug)]
pub struct WaitGate {
    command_id: CommandId,
    rx: oneshot::Receiver<Delivery>,
    queue: CommandQueue,
    finished: bool,
}

pub(crate) fn gate_pair(command_id: CommandId, queue: CommandQueue) -> (GateSignal, WaitGate) {
    let (tx, rx) = oneshot::channel();
    (
        GateSignal { tx },
        WaitGate {
            command_id,
            rx,
            queue,
            finished: false,
        },
    )
}

impl WaitGate {
    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// Suspend until the command is resolved, the broker drains, or `timeout`
    /// elapses. Releases the task on every path.
    pub async fn wait(mut self, timeout: Duration) -> WaitOutcome {
        let waited = tokio::time::timeout(timeout, &mut self.rx).await;
        let outcome = match waited {
            Ok(Ok(delivery)) => delivery.into(),
            // Signal dropped unsent: the entry was drained by a closing queue.
            Ok(Err(_)) => WaitOutcome::ShuttingDown,
            Err(_elapsed) => self.settle_expired(),
        };
        self.finished = true;
        outcome
    }

    /// The timer fired: retire the entry, or collect the delivery from
    /// whoever removed it first.
    fn settle_expired(&mut self) -> WaitOutcome {
        if self.queue.retire(self.command_id).is_some() {
            return WaitOutcome::TimedOut;
        }
        // Lost the race: the remover sent under the queue lock.
        match self.rx.try_recv() {
            Ok(delivery) => delivery.into(),
            Err(_) => WaitOutcome::ShuttingDown,
        }
    }
}

impl Drop for WaitGate {
    fn drop(&mut self) {
        if !self.finished {
            self.queue.retire(self.command_id);
        }
    }
}
