//! Logger builder implementation

mod format;

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::{LogError, LogResult};

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Guard that keeps the logger alive
///
/// Holds the root span (when a service name is configured) entered for the
/// lifetime of the guard.
#[derive(Debug)]
pub struct LoggerGuard {
    _root_span_guard: Option<tracing::span::EnteredSpan>,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Parse the configured filter without installing anything
    pub fn filter(&self) -> LogResult<EnvFilter> {
        EnvFilter::try_new(&self.config.level).map_err(|e| LogError::filter(&self.config.level, e))
    }

    /// Build and initialize the logger
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Filter string cannot be parsed
    /// - A global subscriber is already installed
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = self.filter()?;
        Registry::default()
            .with(filter)
            .with(format::fmt_layer(self.config.format, &self.config.display))
            .try_init()
            .map_err(|e| LogError::Init(e.to_string()))?;

        let root = self
            .config
            .service
            .as_deref()
            .map(|service| tracing::info_span!("app", service).entered());

        tracing::debug!(
            level = %self.config.level,
            format = ?self.config.format,
            "logger initialized"
        );

        Ok(LoggerGuard {
            _root_span_guard: root,
        })
    }
}

impl LoggerGuard {
    /// A guard that owns nothing, for when a subscriber is already in place
    pub(crate) fn noop() -> Self {
        Self {
            _root_span_guard: None,
        }
    }
}
