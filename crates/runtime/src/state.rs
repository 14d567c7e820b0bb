//! Runner lifecycle states and transition validation.

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Where a runner is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// No interpreter loaded; an unstarted context may exist.
    Idle,
    /// The interpreter and its packages are loading.
    Loading,
    /// A session is live and no code is running.
    Ready,
    /// User code is running.
    Running,
    /// User code is running and blocked on `input()`.
    ///
    /// Derived from `Running` and the broker; never stored.
    AwaitingInput,
    /// The context was torn down for good; only a new context revives it.
    Terminated,
}

impl RunnerState {
    /// Whether a session is live.
    #[must_use]
    pub fn has_session(&self) -> bool {
        matches!(self, Self::Ready | Self::Running | Self::AwaitingInput)
    }

    /// Whether user code is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingInput)
    }

    /// Whether the runner is loading.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::AwaitingInput => write!(f, "awaiting_input"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Returns `true` if the stored state may move from `from` to `to`.
///
/// Interrupt (to `Idle`) and terminate (to `Terminated`) are allowed from
/// every state and are not listed here.
#[must_use]
pub fn can_transition(from: RunnerState, to: RunnerState) -> bool {
    matches!(
        (from, to),
        (RunnerState::Idle, RunnerState::Loading)
            | (RunnerState::Terminated, RunnerState::Idle)
            | (RunnerState::Loading, RunnerState::Ready)
            | (RunnerState::Loading, RunnerState::Idle)
            | (RunnerState::Ready, RunnerState::Running)
            | (RunnerState::Running, RunnerState::Ready)
            | (RunnerState::Running, RunnerState::Idle)
    )
}

/// Validate a transition, returning an error if invalid.
pub fn validate_transition(from: RunnerState, to: RunnerState) -> Result<(), LifecycleError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RunnerState::Idle, RunnerState::Loading)]
    #[case(RunnerState::Loading, RunnerState::Ready)]
    #[case(RunnerState::Loading, RunnerState::Idle)]
    #[case(RunnerState::Ready, RunnerState::Running)]
    #[case(RunnerState::Running, RunnerState::Ready)]
    #[case(RunnerState::Running, RunnerState::Idle)]
    #[case(RunnerState::Terminated, RunnerState::Idle)]
    fn valid_transitions(#[case] from: RunnerState, #[case] to: RunnerState) {
        assert!(can_transition(from, to));
        assert!(validate_transition(from, to).is_ok());
    }

    #[rstest]
    #[case(RunnerState::Idle, RunnerState::Running)]
    #[case(RunnerState::Idle, RunnerState::Ready)]
    #[case(RunnerState::Loading, RunnerState::Loading)]
    #[case(RunnerState::Ready, RunnerState::Loading)]
    #[case(RunnerState::Running, RunnerState::Running)]
    #[case(RunnerState::Terminated, RunnerState::Loading)]
    fn invalid_transitions(#[case] from: RunnerState, #[case] to: RunnerState) {
        assert!(!can_transition(from, to));
        let err = validate_transition(from, to).unwrap_err();
        assert_eq!(err.to_string(), format!("invalid transition from {from} to {to}"));
    }

    #[test]
    fn session_and_busy_states() {
        assert!(RunnerState::AwaitingInput.has_session());
        assert!(RunnerState::AwaitingInput.is_busy());
        assert!(!RunnerState::Ready.is_busy());
        assert!(!RunnerState::Loading.has_session());
        assert!(RunnerState::Loading.is_loading());
    }

    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_string(&RunnerState::AwaitingInput).unwrap(),
            "\"awaiting_input\""
        );
    }
}
