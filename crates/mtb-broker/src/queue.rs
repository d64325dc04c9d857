//! Pending-command store plus the response-correlation table.
//!
//! # Invariants
//! - A command id lives in exactly one of `pending` / `inflight` until it is
//!   resolved or retired, then in neither.
//! - `take_next` always yields the oldest pending command (FIFO) and moves it
//!   to `inflight` in the same critical section, so no command is delivered
//!   twice.
//! - Ids are never reused, so a late resolve can only miss, never hit a
//!   different command.
//!
//! One mutex guards all of it. Volumes are human/algorithmic trading rates;
//! correctness beats throughput.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mtb_schemas::{CommandId, CommandState};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::BrokerError;
use crate::gate::{gate_pair, Delivery, GateSignal, WaitGate};

struct Entry {
    command: Command,
    signal: GateSignal,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Entry>,
    inflight: HashMap<CommandId, Entry>,
    /// In-flight ids per command name, oldest first. Convenience index for
    /// responses keyed by name.
    by_name: HashMap<String, VecDeque<CommandId>>,
    closed: bool,
}

impl QueueState {
    fn unindex(&mut self, name: &str, id: CommandId) {
        if let Some(ids) = self.by_name.get_mut(name) {
            ids.retain(|x| *x != id);
            if ids.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    fn finish_inflight(&mut self, id: CommandId, response: String) -> Option<Command> {
        let Entry {
            mut command,
            signal,
        } = self.inflight.remove(&id)?;
        self.unindex(&command.name, id);
        command.state = CommandState::Resolved;
        command.response = Some(response.clone());
        // Sent under the lock; see gate.rs for why.
        if !signal.signal(Delivery::Response(response)) {
            debug!(command_id = %id, "resolved command had no live waiter");
        }
        Some(command)
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Mirror of `pending.len()`, written under the lock, read without it.
    pending_len: AtomicUsize,
    /// Woken on every push so long-polling clients return immediately.
    pushed: Notify,
}

/// Successful push: the queued command and the gate its pusher waits on.
#[derive(Debug)]
pub struct Enqueued {
    pub command: Command,
    pub gate: WaitGate,
}

/// Cloneable handle; all clones share one queue.
#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                pending_len: AtomicUsize::new(0),
                pushed: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // No invariant spans a panic point inside the critical sections.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn sync_len(&self, st: &QueueState) {
        self.shared
            .pending_len
            .store(st.pending.len(), Ordering::Release);
    }

    /// Append a new command. Never blocks beyond the queue lock.
    pub fn push(&self, name: &str, payload: &str) -> Result<Enqueued, BrokerError> {
        let command = Command::new(name, payload);
        let (signal, gate) = gate_pair(command.id, self.clone());

        {
            let mut st = self.lock();
            if st.closed {
                return Err(BrokerError::ShuttingDown);
            }
            st.pending.push_back(Entry {
                command: command.clone(),
                signal,
            });
            self.sync_len(&st);
        }

        self.shared.pushed.notify_waiters();
        Ok(Enqueued { command, gate })
    }

    /// Lock-free check.
    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending_len.load(Ordering::Acquire)
    }

    pub fn inflight_count(&self) -> usize {
        self.lock().inflight.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Long-poll flavour of [`has_pending`](Self::has_pending): returns as
    /// soon as a command is pending, or `false` once `max_wait` passes.
    pub async fn wait_for_pending(&self, max_wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let notified = self.shared.pushed.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            if self.has_pending() {
                return true;
            }
            if self.is_closed() {
                return false;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.has_pending();
            }
        }
    }

    /// Move the oldest pending command to in-flight and return it.
    /// `None` when nothing is pending; never blocks.
    pub fn take_next(&self) -> Option<Command> {
        let mut st = self.lock();
        let mut entry = st.pending.pop_front()?;
        self.sync_len(&st);

        entry.command.state = CommandState::Taken;
        let command = entry.command.clone();
        st.by_name
            .entry(command.name.clone())
            .or_default()
            .push_back(command.id);
        st.inflight.insert(command.id, entry);
        Some(command)
    }

    /// Resolve an in-flight command by id and wake its waiter.
    pub fn resolve(&self, id: CommandId, response: &str) -> Result<Command, BrokerError> {
        self.lock()
            .finish_inflight(id, response.to_string())
            .ok_or_else(|| BrokerError::NotFound(format!("id={id}")))
    }

    /// Resolve the oldest in-flight command carrying `name`.
    ///
    /// Ambiguous when several commands of that name are in flight; the
    /// oldest wins and the ambiguity is logged.
    pub fn resolve_by_name(&self, name: &str, response: &str) -> Result<Command, BrokerError> {
        let mut st = self.lock();
        let (id, others) = match st.by_name.get(name) {
            Some(ids) if !ids.is_empty() => (ids[0], ids.len() - 1),
            _ => return Err(BrokerError::NotFound(format!("name={name}"))),
        };
        if others > 0 {
            warn!(
                name = %name,
                command_id = %id,
                others,
                "response keyed by name while several commands share it; binding oldest"
            );
        }
        st.finish_inflight(id, response.to_string())
            .ok_or_else(|| BrokerError::NotFound(format!("name={name}")))
    }

    /// Remove a command wherever it is, without delivering anything.
    /// Used by gates on timeout and on drop. `None` if already gone.
    pub(crate) fn retire(&self, id: CommandId) -> Option<Command> {
        let mut st = self.lock();

        if let Some(pos) = st.pending.iter().position(|e| e.command.id == id) {
            let entry = st.pending.remove(pos)?;
            self.sync_len(&st);
            let mut command = entry.command;
            command.state = CommandState::TimedOut;
            return Some(command);
        }

        let entry = st.inflight.remove(&id)?;
        st.unindex(&entry.command.name, id);
        let mut command = entry.command;
        command.state = CommandState::TimedOut;
        Some(command)
    }

    /// Refuse further pushes and release every outstanding waiter with a
    /// shutdown delivery. Returns how many commands were drained.
    pub fn close(&self) -> usize {
        let drained = {
            let mut st = self.lock();
            st.closed = true;
            let mut entries: Vec<Entry> = st.pending.drain(..).collect();
            entries.extend(st.inflight.drain().map(|(_, e)| e));
            st.by_name.clear();
            self.sync_len(&st);

            let n = entries.len();
            for e in entries {
                e.signal.signal(Delivery::Shutdown);
            }
            n
        };
        self.shared.pushed.notify_waiters();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_next_is_fifo_and_moves_to_inflight() {
        let q = CommandQueue::new();
        let a = q.push("a", "1").unwrap();
        let b = q.push("b", "2").unwrap();
        assert_eq!(q.pending_count(), 2);

        let first = q.take_next().unwrap();
        assert_eq!(first.id, a.command.id);
        assert_eq!(first.state, CommandState::Taken);
        assert_eq!(q.pending_count(), 1);
        assert_eq!(q.inflight_count(), 1);

        assert_eq!(q.take_next().unwrap().id, b.command.id);
        assert!(q.take_next().is_none());
        assert!(!q.has_pending());
    }

    #[test]
    fn resolve_pending_but_untaken_is_not_found() {
        let q = CommandQueue::new();
        let e = q.push("a", "1").unwrap();
        assert!(matches!(
            q.resolve(e.command.id, "r"),
            Err(BrokerError::NotFound(_))
        ));
        assert!(q.has_pending(), "failed resolve must not touch the queue");
    }

    #[test]
    fn retire_removes_from_either_side() {
        let q = CommandQueue::new();
        let a = q.push("a", "1").unwrap();
        let b = q.push("b", "2").unwrap();
        q.take_next().unwrap();

        let retired = q.retire(a.command.id).unwrap();
        assert_eq!(retired.state, CommandState::TimedOut);
        assert_eq!(q.inflight_count(), 0);

        q.retire(b.command.id).unwrap();
        assert!(!q.has_pending());
        assert!(q.retire(b.command.id).is_none());
        // Gates are dropped at end of scope; retiring twice stays harmless.
    }

    #[test]
    fn closed_queue_refuses_push() {
        let q = CommandQueue::new();
        let _e = q.push("a", "1").unwrap();
        assert_eq!(q.close(), 1);
        assert!(q.is_closed());
        assert!(matches!(q.push("b", "2"), Err(BrokerError::ShuttingDown)));
        assert!(!q.has_pending());
    }

    #[test]
    fn dropping_gate_retires_command() {
        let q = CommandQueue::new();
        let e = q.push("a", "1").unwrap();
        drop(e.gate);
        assert!(!q.has_pending());
        assert!(q.take_next().is_none());
    }
}
