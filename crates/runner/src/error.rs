//! Runner error types.

use pybridge_channel::ChannelError;

use crate::traceback::Traceback;

/// Failures reported by an [`Interpreter`](crate::Interpreter) backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InterpreterError {
    /// The interpreter could not be started.
    #[error("failed to load interpreter: {0}")]
    Load(String),

    /// A package could not be loaded or installed.
    #[error("failed to load package {name}: {message}")]
    Package {
        /// Package that failed.
        name: String,
        /// Backend message.
        message: String,
    },

    /// User code raised an exception.
    #[error("{0}")]
    Raised(Traceback),

    /// A file system operation failed.
    #[error("{path}: {message}")]
    Filesystem {
        /// Path operated on.
        path: String,
        /// Backend message.
        message: String,
    },

    /// A blocking input call could not be answered.
    #[error("input request failed: {0}")]
    Input(#[from] ChannelError),

    /// The interpreter died or broke protocol.
    #[error("interpreter crashed: {0}")]
    Crashed(String),
}

impl InterpreterError {
    /// Create a [`Package`](Self::Package) error.
    pub fn package(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Package {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a [`Filesystem`](Self::Filesystem) error.
    pub fn filesystem(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Filesystem {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The traceback, when user code raised.
    pub fn traceback(&self) -> Option<&Traceback> {
        match self {
            Self::Raised(tb) => Some(tb),
            _ => None,
        }
    }
}

/// Errors from an execution context or its worker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunnerError {
    /// No session has been initialized on this context.
    #[error("interpreter is not loaded yet")]
    NotReady,

    /// The context already hosts a session.
    #[error("execution context is already initialized")]
    AlreadyInitialized,

    /// Loading the interpreter or its packages failed.
    #[error("initialization failed: {0}")]
    Initialization(#[source] InterpreterError),

    /// User code raised; the traceback has its dispatch frame removed.
    #[error("Traceback (most recent call last):\n{0}")]
    Execution(Traceback),

    /// Any other backend failure.
    #[error(transparent)]
    Interpreter(InterpreterError),

    /// The background worker is gone (terminated or crashed).
    #[error("execution context worker is gone")]
    WorkerGone,
}

impl RunnerError {
    /// Whether user code raised.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Whether the worker was torn down under the caller.
    pub fn is_worker_gone(&self) -> bool {
        matches!(self, Self::WorkerGone)
    }

    /// The user-code traceback, if any.
    pub fn traceback(&self) -> Option<&Traceback> {
        match self {
            Self::Execution(tb) => Some(tb),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traceback::Frame;

    #[test]
    fn execution_error_renders_python_header() {
        let err = RunnerError::Execution(Traceback {
            frames: vec![Frame::new("code", 1, "<module>")],
            exception: "NameError: name 'x' is not defined".into(),
        });
        assert_eq!(
            err.to_string(),
            "Traceback (most recent call last):\n  File \"code\", line 1, in <module>\nNameError: name 'x' is not defined"
        );
        assert!(err.is_execution());
        assert!(err.traceback().is_some());
    }

    #[test]
    fn package_error_display() {
        let err = InterpreterError::package("nump", "No module named 'nump'");
        assert_eq!(err.to_string(), "failed to load package nump: No module named 'nump'");
        assert!(err.traceback().is_none());
    }

    #[test]
    fn worker_gone_classification() {
        assert!(RunnerError::WorkerGone.is_worker_gone());
        assert!(!RunnerError::NotReady.is_worker_gone());
    }
}
