#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # pybridge Runner
//!
//! The execution side of pybridge: one Python interpreter per
//! [`ExecutionContext`], hosted on a background [`Worker`] task.
//!
//! - [`Interpreter`] / [`InterpreterFactory`]: the interpreter port
//! - [`PythonProcess`]: CPython in a child process
//! - [`SessionBridge`]: stdout and blocking input, wired to the
//!   coordination channel
//! - `testing::ScriptedInterpreter`: deterministic backend for tests
//!   (feature `testing`)
//!
//! ```ignore
//! let factory = PythonProcessFactory::default();
//! let worker = Worker::spawn(ExecutionContext::new(
//!     factory.create(),
//!     Arc::new(DirectTransport::new()),
//!     discard_sink(),
//! ));
//! worker.init(PackageSet::empty()).await?;
//! worker.run("print('hello')").await?;
//! ```

pub mod bridge;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod process;
pub mod reload;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traceback;
pub mod worker;

pub use bridge::{BANNER, OutputSink, SessionBridge, discard_sink};
pub use context::{ExecutionContext, SessionInfo};
pub use error::{InterpreterError, RunnerError};
pub use interpreter::{Host, Interpreter, InterpreterFactory, SharedFactory};
pub use process::{PythonConfig, PythonProcess, PythonProcessFactory};
pub use reload::reload_preamble;
pub use traceback::{Frame, Traceback};
pub use worker::Worker;
