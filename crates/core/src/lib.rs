#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # pybridge Core
//!
//! Shared building blocks for the pybridge crates.
//!
//! ## Key Components
//!
//! - **Identifiers**: [`SessionId`], [`RequestId`]
//! - **Packages**: [`PackageSet`] with default/override merging
//! - **Configuration**: [`RunnerConfig`], [`TransportConfig`], TOML and
//!   environment loading
//!
//! ## Usage
//!
//! ```rust
//! use pybridge_core::{PackageSet, RunnerConfig};
//!
//! let config = RunnerConfig {
//!     timeout_ms: 5_000,
//!     packages: PackageSet::new(["numpy"], Vec::<String>::new()),
//!     ..RunnerConfig::default()
//! };
//! assert!(config.timeout().is_some());
//! ```

pub mod config;
pub mod id;
pub mod packages;

mod error;

pub use config::{DEFAULT_PROXY_PREFIX, RunnerConfig, TransportConfig};
pub use error::ConfigError;
pub use id::{RequestId, SessionId, UuidParseError};
pub use packages::PackageSet;

/// Common prelude for pybridge crates
pub mod prelude {
    pub use super::{ConfigError, PackageSet, RequestId, RunnerConfig, SessionId, TransportConfig};
}
