//! Error types for the kernel.
//!
//! The kernel has no recoverable-error taxonomy of its own: unmatched events
//! are dropped and a conduit whose counterpart never acts again simply blocks.
//! What remains are the few conditions Rust lets us observe instead of
//! hanging: a closed conduit, a policy that returned an error, an unknown
//! policy name, or a task that panicked.

use thiserror::Error;

use crate::event::MachineId;

/// Errors surfaced by kernel processes.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A spawn request named a policy that was never registered.
    #[error("no policy registered under `{0}`")]
    UnknownPolicy(String),

    /// The other side of a conduit went away.
    #[error("{conduit} conduit closed")]
    ConduitClosed { conduit: &'static str },

    /// A policy handler failed. The machine still ran its halt protocol.
    #[error("machine {machine} policy failed: {source}")]
    Policy {
        machine: MachineId,
        #[source]
        source: anyhow::Error,
    },

    /// A task tracked by a completion barrier panicked or was aborted.
    #[error("task in {scope} failed: {source}")]
    TaskFailed {
        scope: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl KernelError {
    pub(crate) fn closed(conduit: &'static str) -> Self {
        Self::ConduitClosed { conduit }
    }
}
