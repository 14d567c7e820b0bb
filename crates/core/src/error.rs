//! Configuration error types.

use std::path::PathBuf;

/// Errors raised while loading a [`RunnerConfig`](crate::RunnerConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration document is not valid TOML or has the wrong shape.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An environment variable holds a value that cannot be interpreted.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        /// Variable name.
        key: String,
        /// Raw value found in the environment.
        value: String,
        /// What was expected instead.
        reason: String,
    },
}

impl ConfigError {
    /// Create an [`InvalidEnv`](Self::InvalidEnv) error.
    pub fn invalid_env(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidEnv {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from the process environment rather than a file.
    pub fn is_env_error(&self) -> bool {
        matches!(self, Self::InvalidEnv { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_env_display() {
        let err = ConfigError::invalid_env("PYBRIDGE_TIMEOUT_MS", "soon", "expected an integer");
        assert_eq!(
            err.to_string(),
            "invalid value \"soon\" for PYBRIDGE_TIMEOUT_MS: expected an integer"
        );
        assert!(err.is_env_error());
    }

    #[test]
    fn io_error_is_not_env_error() {
        let err = ConfigError::Io {
            path: PathBuf::from("/missing.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(!err.is_env_error());
        assert!(err.to_string().starts_with("failed to read /missing.toml"));
    }
}
