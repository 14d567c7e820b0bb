//! Error type for logger setup

/// Errors raised while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The filter directive could not be parsed
    #[error("invalid filter '{filter}': {reason}")]
    Filter {
        /// Directive as given
        filter: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber was already installed, or installation failed
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

impl LogError {
    /// Create a filter parsing error
    pub fn filter(filter: impl Into<String>, reason: impl ToString) -> Self {
        Self::Filter {
            filter: filter.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error means a subscriber is already in place
    pub fn is_already_initialized(&self) -> bool {
        matches!(self, Self::Init(_))
    }
}

/// Result type for logger operations
pub type LogResult<T> = Result<T, LogError>;
