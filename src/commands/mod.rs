//! Remote commands and the correlation of their asynchronous results
//!
//! A command is answered twice: synchronously with a [`CommandResponse`] and
//! later with a [`CommandResult`] POSTed to the `response_url` we supplied.
//! Each dispatched command gets a unique request id that is embedded in its
//! response URL; the [`CommandDispatcher`] resolves it exactly once, by
//! callback, synchronous rejection or timeout.
//!
//! [`CommandResponse`]: crate::ocpi::CommandResponse

mod dispatcher;
mod handler;
mod pending;

use crate::ocpi::CommandResult;

pub use dispatcher::{CommandDispatcher, DispatchedCommand};
pub use handler::{CommandHandler, UnsupportedCommands};
pub use pending::CallbackOutcome;

/// Lifecycle of a dispatched command
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandState {
    /// Sent, no synchronous answer yet
    Sent,
    /// Synchronously accepted, waiting for the callback
    Acked,
    /// Resolved by a callback or a synchronous rejection
    Completed,
    /// No callback before the deadline
    TimedOut,
}

/// Final outcome of a dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub request_id: String,
    pub state: CommandState,
    pub result: CommandResult,
}
