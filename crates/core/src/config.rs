//! Runner configuration.
//!
//! A [`RunnerConfig`] can be built in code, parsed from TOML, or overlaid with
//! `PYBRIDGE_*` environment variables:
//!
//! ```toml
//! timeout_ms = 5000
//! lazy_start = true
//!
//! [packages]
//! platform_provided = ["numpy"]
//! externally_fetched = ["rich"]
//!
//! [transport]
//! mode = "proxied"
//! prefix = "pybridge"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::packages::PackageSet;

/// Path prefix used by the proxied transport when none is configured.
pub const DEFAULT_PROXY_PREFIX: &str = "pybridge";

/// Environment variable overriding [`RunnerConfig::timeout_ms`].
pub const ENV_TIMEOUT_MS: &str = "PYBRIDGE_TIMEOUT_MS";
/// Environment variable overriding [`RunnerConfig::lazy_start`].
pub const ENV_LAZY_START: &str = "PYBRIDGE_LAZY_START";
/// Environment variable overriding [`RunnerConfig::terminate_after_each_run`].
pub const ENV_TERMINATE_AFTER_EACH_RUN: &str = "PYBRIDGE_TERMINATE_AFTER_EACH_RUN";
/// Environment variable selecting the transport mode (`direct` or `proxied`).
pub const ENV_TRANSPORT: &str = "PYBRIDGE_TRANSPORT";
/// Environment variable setting the proxied transport prefix.
pub const ENV_PROXY_PREFIX: &str = "PYBRIDGE_PROXY_PREFIX";
/// Comma-separated platform-provided packages appended to the defaults.
pub const ENV_PLATFORM_PACKAGES: &str = "PYBRIDGE_PLATFORM_PACKAGES";
/// Comma-separated externally-fetched packages appended to the defaults.
pub const ENV_EXTERNAL_PACKAGES: &str = "PYBRIDGE_EXTERNAL_PACKAGES";

/// How input requests travel from the execution context to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TransportConfig {
    /// In-process pending table shared by both sides.
    #[default]
    Direct,
    /// Requests are issued as intercepted `GET /{prefix}-get-input/` calls.
    Proxied {
        /// Path prefix of the reserved input endpoint.
        #[serde(default = "default_prefix")]
        prefix: String,
    },
}

fn default_prefix() -> String {
    DEFAULT_PROXY_PREFIX.to_owned()
}

impl TransportConfig {
    /// Proxied transport with the default prefix.
    #[must_use]
    pub fn proxied() -> Self {
        Self::Proxied {
            prefix: default_prefix(),
        }
    }

    /// Short name of the mode, as used in configuration files.
    #[must_use]
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Proxied { .. } => "proxied",
        }
    }
}

/// Process-wide runner settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Packages loaded into every session.
    pub packages: PackageSet,
    /// Per-run wall-clock limit in milliseconds; `0` means unbounded.
    pub timeout_ms: u64,
    /// Defer context creation until the first run, queueing runs while loading.
    pub lazy_start: bool,
    /// Tear the context down after every completed run.
    pub terminate_after_each_run: bool,
    /// Input transport selection.
    pub transport: TransportConfig,
}

impl RunnerConfig {
    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded runner configuration");
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Overlay `PYBRIDGE_*` variables from the process environment.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay `PYBRIDGE_*` variables obtained from `lookup`.
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = value.trim().parse().map_err(|_| {
                ConfigError::invalid_env(ENV_TIMEOUT_MS, &value, "expected milliseconds as an integer")
            })?;
        }
        if let Some(value) = lookup(ENV_LAZY_START) {
            self.lazy_start = parse_bool(ENV_LAZY_START, &value)?;
        }
        if let Some(value) = lookup(ENV_TERMINATE_AFTER_EACH_RUN) {
            self.terminate_after_each_run = parse_bool(ENV_TERMINATE_AFTER_EACH_RUN, &value)?;
        }
        if let Some(value) = lookup(ENV_TRANSPORT) {
            self.transport = match value.trim().to_ascii_lowercase().as_str() {
                "direct" => TransportConfig::Direct,
                "proxied" => match self.transport {
                    proxied @ TransportConfig::Proxied { .. } => proxied,
                    TransportConfig::Direct => TransportConfig::proxied(),
                },
                _ => {
                    return Err(ConfigError::invalid_env(
                        ENV_TRANSPORT,
                        value,
                        "expected `direct` or `proxied`",
                    ));
                }
            };
        }
        if let Some(value) = lookup(ENV_PROXY_PREFIX)
            && let TransportConfig::Proxied { prefix } = &mut self.transport
        {
            value.trim().clone_into(prefix);
        }
        if let Some(value) = lookup(ENV_PLATFORM_PACKAGES) {
            self.packages.extend_platform(split_list(&value));
        }
        if let Some(value) = lookup(ENV_EXTERNAL_PACKAGES) {
            self.packages.extend_external(split_list(&value));
        }
        Ok(self)
    }

    /// The per-run limit, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid_env(key, value, "expected a boolean")),
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_direct_and_unbounded() {
        let config = RunnerConfig::default();
        assert_eq!(config.transport, TransportConfig::Direct);
        assert_eq!(config.timeout(), None);
        assert!(!config.lazy_start);
        assert!(!config.terminate_after_each_run);
        assert!(config.packages.is_empty());
    }

    #[test]
    fn parses_full_toml_document() {
        let config = RunnerConfig::from_toml_str(
            r#"
            timeout_ms = 50
            lazy_start = true
            terminate_after_each_run = true

            [packages]
            platform_provided = ["numpy", "numpy"]
            externally_fetched = ["rich"]

            [transport]
            mode = "proxied"
            prefix = "react-py"
            "#,
        )
        .unwrap();

        assert_eq!(config.timeout(), Some(Duration::from_millis(50)));
        assert!(config.lazy_start);
        assert!(config.terminate_after_each_run);
        assert_eq!(config.packages, PackageSet::new(["numpy"], ["rich"]));
        assert_eq!(
            config.transport,
            TransportConfig::Proxied {
                prefix: "react-py".into()
            }
        );
    }

    #[test]
    fn proxied_without_prefix_uses_default() {
        let config = RunnerConfig::from_toml_str("[transport]\nmode = \"proxied\"\n").unwrap();
        assert_eq!(config.transport, TransportConfig::proxied());
        assert_eq!(config.transport.mode(), "proxied");
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let err = RunnerConfig::from_toml_str("[transport]\nmode = \"carrier-pigeon\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms = 1200").unwrap();
        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.timeout_ms, 1200);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunnerConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overlay_applies_every_variable() {
        let config = RunnerConfig::default()
            .with_env_from(env(&[
                (ENV_TIMEOUT_MS, "250"),
                (ENV_LAZY_START, "true"),
                (ENV_TERMINATE_AFTER_EACH_RUN, "1"),
                (ENV_TRANSPORT, "proxied"),
                (ENV_PROXY_PREFIX, "edu"),
                (ENV_PLATFORM_PACKAGES, "numpy, pandas"),
                (ENV_EXTERNAL_PACKAGES, "rich,,numpy"),
            ]))
            .unwrap();

        assert_eq!(config.timeout_ms, 250);
        assert!(config.lazy_start);
        assert!(config.terminate_after_each_run);
        assert_eq!(
            config.transport,
            TransportConfig::Proxied {
                prefix: "edu".into()
            }
        );
        assert_eq!(config.packages, PackageSet::new(["numpy", "pandas"], ["rich"]));
    }

    #[test]
    fn prefix_alone_does_not_switch_mode() {
        let config = RunnerConfig::default()
            .with_env_from(env(&[(ENV_PROXY_PREFIX, "edu")]))
            .unwrap();
        assert_eq!(config.transport, TransportConfig::Direct);
    }

    #[rstest]
    #[case(ENV_TIMEOUT_MS, "soon")]
    #[case(ENV_LAZY_START, "maybe")]
    #[case(ENV_TRANSPORT, "carrier-pigeon")]
    fn env_overlay_rejects_garbage(#[case] key: &str, #[case] value: &str) {
        let err = RunnerConfig::default()
            .with_env_from(env(&[(key, value)]))
            .unwrap_err();
        assert!(err.is_env_error());
    }
}
