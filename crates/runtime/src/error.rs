//! Lifecycle error types.

use pybridge_channel::ChannelError;
use pybridge_runner::RunnerError;

use crate::state::RunnerState;

/// Errors reported by a [`RunnerController`](crate::RunnerController).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    /// Loading the interpreter or its packages failed; the runner is `Idle`.
    #[error("initialization failed: {0}")]
    Initialization(#[source] RunnerError),

    /// No live session to run code in.
    #[error("interpreter is not loaded yet")]
    NotReady,

    /// The run exceeded its time limit and the context was destroyed.
    #[error("execution timed out after {timeout_ms} ms")]
    Timeout {
        /// Configured limit.
        timeout_ms: u64,
    },

    /// A newer run replaced this one while the interpreter was loading.
    #[error("queued run superseded by a newer one")]
    Superseded,

    /// The context was interrupted or terminated under the caller.
    #[error("execution context was interrupted")]
    Interrupted,

    /// The operation is not valid in the current state.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: RunnerState,
        /// Attempted target state.
        to: RunnerState,
    },

    /// `send_input` found no outstanding request for the live session.
    #[error("no input request is pending")]
    NoPendingInput,

    /// Execution context failure.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Coordination channel failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl LifecycleError {
    /// Whether the run timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether no session was available.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady)
    }

    /// Whether a queued run was replaced.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    /// Whether initialization failed.
    pub fn is_initialization(&self) -> bool {
        matches!(self, Self::Initialization(_))
    }

    /// Whether an input response could not be delivered.
    pub fn is_unresolvable_input(&self) -> bool {
        matches!(self, Self::Channel(e) if e.is_unresolvable())
    }
}
