//! Lifecycle events broadcast to observers.
//!
//! Events are projections of controller state: subscribers that lag or drop
//! them lose nothing authoritative.

use pybridge_core::SessionId;
use serde::{Deserialize, Serialize};

use crate::state::RunnerState;

/// Something that happened to a runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    /// The stored state changed.
    StateChanged {
        /// Previous state.
        from: RunnerState,
        /// New state.
        to: RunnerState,
    },
    /// The interpreter finished loading.
    Ready {
        /// New session.
        session_id: SessionId,
        /// Interpreter version.
        interpreter_version: String,
    },
    /// Loading failed.
    InitializationFailed {
        /// Error message.
        error: String,
    },
    /// A piece of stdout.
    Output {
        /// Session that wrote it.
        session_id: SessionId,
        /// Raw text.
        text: String,
    },
    /// A run returned to `Ready`.
    RunCompleted {
        /// Whether user code raised.
        raised: bool,
    },
    /// A run hit its time limit.
    TimedOut {
        /// Configured limit.
        timeout_ms: u64,
    },
    /// The context was torn down by `interrupt` or `terminate`.
    Interrupted,
}

impl RunnerEvent {
    /// Event type name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::Ready { .. } => "ready",
            Self::InitializationFailed { .. } => "initialization_failed",
            Self::Output { .. } => "output",
            Self::RunCompleted { .. } => "run_completed",
            Self::TimedOut { .. } => "timed_out",
            Self::Interrupted => "interrupted",
        }
    }
}
