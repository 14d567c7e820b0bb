//! The interpreter port.
//!
//! An [`Interpreter`] is an opaque capability: evaluate code, stream its
//! stdout, expose a file system, load packages. It talks back to its host
//! through [`Host`], which is how blocking input reaches the coordination
//! channel.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::InterpreterError;

/// Services the host offers to a running interpreter.
#[async_trait]
pub trait Host: Send + Sync {
    /// Receive a piece of the interpreter's stdout character stream.
    fn write(&self, text: &str);

    /// Implement `input(prompt)` and `sys.stdin.readline()`.
    ///
    /// Suspends until the user answers; the returned value carries no
    /// trailing newline.
    async fn read_line(&self, prompt: &str) -> Result<String, InterpreterError>;
}

/// A Python interpreter backend.
///
/// Methods are called one at a time by the owning execution context.
#[async_trait]
pub trait Interpreter: Send {
    /// Start the interpreter, wiring stdout and stdin to `host`.
    ///
    /// Returns the interpreter version string.
    async fn load(&mut self, host: Arc<dyn Host>) -> Result<String, InterpreterError>;

    /// Install the HTTP-compatibility shim.
    ///
    /// Runs before any package is loaded. Backends whose networking already
    /// works unpatched keep the default, which installs nothing.
    async fn install_shims(&mut self) -> Result<(), InterpreterError> {
        Ok(())
    }

    /// Load packages shipped with the interpreter distribution, as one batch.
    async fn load_packages(&mut self, names: &[String]) -> Result<(), InterpreterError>;

    /// Install packages from a package index.
    async fn install_packages(&mut self, names: &[String]) -> Result<(), InterpreterError>;

    /// Evaluate a snippet as a module body in a fresh namespace.
    async fn exec(&mut self, code: &str) -> Result<(), InterpreterError>;

    /// Read a UTF-8 text file.
    async fn read_file(&mut self, path: &str) -> Result<String, InterpreterError>;

    /// Write a UTF-8 text file, replacing existing contents.
    async fn write_file(&mut self, path: &str, contents: &str) -> Result<(), InterpreterError>;

    /// Create a directory.
    async fn mkdir(&mut self, path: &str) -> Result<(), InterpreterError>;

    /// Remove an empty directory.
    async fn rmdir(&mut self, path: &str) -> Result<(), InterpreterError>;
}

/// Produces unstarted interpreters, one per execution context.
pub trait InterpreterFactory: Send + Sync {
    /// Create a new interpreter; nothing is loaded until [`Interpreter::load`].
    fn create(&self) -> Box<dyn Interpreter>;
}

impl<F> InterpreterFactory for F
where
    F: Fn() -> Box<dyn Interpreter> + Send + Sync,
{
    fn create(&self) -> Box<dyn Interpreter> {
        self()
    }
}

/// Shared handle to a factory.
pub type SharedFactory = Arc<dyn InterpreterFactory>;
