//! Correlation table of outstanding commands

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{CommandOutcome, CommandState};
use crate::ocpi::{CommandResult, CommandType};
use crate::parties::PartyIdentity;

/// Resolved ids remembered to tell duplicates from unknown ids
const HISTORY_CAPACITY: usize = 1024;

/// Result of delivering a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The pending command was resolved by this callback
    Resolved,
    /// The command was already completed or timed out
    AlreadyResolved(CommandState),
    /// No command with this id was ever seen, or it was forgotten
    Unknown,
    /// The id belongs to a command sent to another party
    WrongParty,
}

struct PendingCommand {
    party: PartyIdentity,
    kind: CommandType,
    state: CommandState,
    waiter: oneshot::Sender<CommandOutcome>,
    deadline: Option<JoinHandle<()>>,
}

/// Pending entries keyed by request id
///
/// Every entry is removed exactly once, by whichever of callback, timeout or
/// synchronous rejection gets the lock first. Locks are never held across an
/// `.await`.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingCommand>>,
    history: Mutex<VecDeque<(String, CommandState)>>,
}

impl PendingTable {
    /// Register a command before it is sent
    pub fn insert(
        &self,
        request_id: &str,
        party: PartyIdentity,
        kind: CommandType,
    ) -> oneshot::Receiver<CommandOutcome> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            request_id.to_string(),
            PendingCommand {
                party,
                kind,
                state: CommandState::Sent,
                waiter: tx,
                deadline: None,
            },
        );
        rx
    }

    /// Attach the deadline task, aborting it at once if the entry is gone
    pub fn set_deadline(&self, request_id: &str, task: JoinHandle<()>) {
        let mut entries = self.entries.lock();
        match entries.get_mut(request_id) {
            Some(entry) => entry.deadline = Some(task),
            None => task.abort(),
        }
    }

    /// Record the synchronous ACCEPTED
    pub fn mark_acked(&self, request_id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(request_id)
            && entry.state == CommandState::Sent
        {
            entry.state = CommandState::Acked;
        }
    }

    /// Current state, pending or remembered
    #[must_use]
    pub fn state(&self, request_id: &str) -> Option<CommandState> {
        if let Some(entry) = self.entries.lock().get(request_id) {
            return Some(entry.state);
        }
        self.history
            .lock()
            .iter()
            .find(|(id, _)| id == request_id)
            .map(|(_, state)| *state)
    }

    /// Number of outstanding commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no command is outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Resolve from a callback sent by `from`
    pub fn resolve_callback(
        &self,
        from: &PartyIdentity,
        request_id: &str,
        result: CommandResult,
    ) -> CallbackOutcome {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.get(request_id) {
                Some(entry) if &entry.party != from => return CallbackOutcome::WrongParty,
                Some(_) => entries.remove(request_id),
                None => None,
            }
        };

        match entry {
            Some(entry) => {
                self.finish(request_id, entry, CommandState::Completed, result);
                CallbackOutcome::Resolved
            }
            None => self
                .state(request_id)
                .map_or(CallbackOutcome::Unknown, CallbackOutcome::AlreadyResolved),
        }
    }

    /// Resolve without a callback: synchronous rejection or send failure
    ///
    /// Returns false if the entry was already resolved.
    pub fn complete(&self, request_id: &str, result: CommandResult) -> bool {
        let entry = self.entries.lock().remove(request_id);
        entry.is_some_and(|entry| {
            self.finish(request_id, entry, CommandState::Completed, result);
            true
        })
    }

    /// Resolve to `TIMED_OUT`
    ///
    /// Returns false if the entry was already resolved.
    pub fn expire(&self, request_id: &str) -> bool {
        let entry = self.entries.lock().remove(request_id);
        entry.is_some_and(|entry| {
            self.finish(
                request_id,
                entry,
                CommandState::TimedOut,
                CommandResult::new(crate::ocpi::CommandResultType::Timeout),
            );
            true
        })
    }

    fn finish(
        &self,
        request_id: &str,
        entry: PendingCommand,
        state: CommandState,
        result: CommandResult,
    ) {
        if state != CommandState::TimedOut
            && let Some(deadline) = entry.deadline
        {
            deadline.abort();
        }

        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back((request_id.to_string(), state));
        }

        tracing::debug!(
            request_id,
            party = %entry.party,
            command = %entry.kind,
            ?state,
            result = ?result.result,
            "command resolved"
        );

        let outcome = CommandOutcome {
            request_id: request_id.to_string(),
            state,
            result,
        };
        if entry.waiter.send(outcome).is_err() {
            tracing::trace!(request_id, "nobody awaits the command outcome");
        }
    }
}
