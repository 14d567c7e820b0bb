//! # pybridge Log
//!
//! Logging setup shared by pybridge hosts and interpreter workers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! fn main() -> Result<(), pybridge_log::LogError> {
//!     let _guard = pybridge_log::auto_init()?;
//!     tracing::info!(timeout_ms = 5000, "runner starting");
//!     Ok(())
//! }
//! ```
//!
//! The filter comes from `PYBRIDGE_LOG` (or `RUST_LOG`), the output format
//! from `PYBRIDGE_LOG_FORMAT` (`pretty`, `compact`, `json`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, ENV_LOG, ENV_LOG_FORMAT, Format};
pub use error::{LogError, LogResult};

/// Auto-detect and initialize the best logging configuration
pub fn auto_init() -> LogResult<LoggerGuard> {
    if std::env::var(ENV_LOG).is_ok() || std::env::var("RUST_LOG").is_ok() {
        init_with(Config::from_env())
    } else if cfg!(debug_assertions) {
        init_with(Config::development())
    } else {
        init_with(Config::production())
    }
}

/// Initialize with default configuration
pub fn init() -> LogResult<LoggerGuard> {
    init_with(Config::default())
}

/// Initialize with custom configuration
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Initialize for tests; a no-op when a subscriber is already installed
pub fn init_test() -> LogResult<LoggerGuard> {
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggerGuard::noop());
    }
    match init_with(Config::test()) {
        Err(e) if e.is_already_initialized() => Ok(LoggerGuard::noop()),
        other => other,
    }
}
