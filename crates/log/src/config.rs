//! Logging configuration and presets

use serde::{Deserialize, Serialize};

/// Environment variable holding the filter directive (takes precedence over `RUST_LOG`).
pub const ENV_LOG: &str = "PYBRIDGE_LOG";
/// Environment variable selecting the output format.
pub const ENV_LOG_FORMAT: &str = "PYBRIDGE_LOG_FORMAT";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level filter (e.g., "info", "debug,pybridge_proxy=trace")
    pub level: String,

    /// Output format
    pub format: Format,

    /// Display configuration
    pub display: DisplayConfig,

    /// Service name attached to a root span, if set
    pub service: Option<String>,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Human-readable with colors and indentation
    Pretty,
    /// Compact single-line output
    Compact,
    /// Structured JSON output
    Json,
}

impl Format {
    /// Parse a format name; unknown names fall back to [`Format::Compact`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// What each formatted event shows besides its message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// ANSI colors
    pub colors: bool,
    /// Event target (module path)
    pub target: bool,
    /// Source file and line
    pub source: bool,
    /// Thread ids
    pub thread_ids: bool,
    /// Timestamps
    pub time: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            target: true,
            source: false,
            thread_ids: false,
            time: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            display: DisplayConfig::default(),
            service: None,
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(level) = lookup(ENV_LOG).or_else(|| lookup("RUST_LOG")) {
            config.level = level;
        }

        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            config.format = Format::from_name(&format);
            if config.format == Format::Json {
                config.display.colors = false;
            }
        }

        config
    }

    /// Development configuration (pretty, debug level)
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            display: DisplayConfig {
                colors: true,
                source: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production configuration (JSON, info level)
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                source: false,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Test configuration (plain compact output, everything enabled)
    #[must_use]
    pub fn test() -> Self {
        Self {
            level: "trace".to_string(),
            format: Format::Compact,
            display: DisplayConfig {
                colors: false,
                time: false,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Attach a service name to every event through a root span
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn pybridge_log_wins_over_rust_log() {
        let config = Config::from_lookup(|key| match key {
            ENV_LOG => Some("pybridge_runtime=trace".into()),
            "RUST_LOG" => Some("warn".into()),
            _ => None,
        });
        assert_eq!(config.level, "pybridge_runtime=trace");
    }

    #[test]
    fn rust_log_is_the_fallback() {
        let config = Config::from_lookup(|key| (key == "RUST_LOG").then(|| "warn".to_string()));
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, Format::Compact);
    }

    #[rstest]
    #[case("pretty", Format::Pretty)]
    #[case("JSON", Format::Json)]
    #[case("compact", Format::Compact)]
    #[case("logfmt", Format::Compact)]
    fn format_names(#[case] name: &str, #[case] expected: Format) {
        assert_eq!(Format::from_name(name), expected);
    }

    #[test]
    fn json_from_env_disables_colors() {
        let config = Config::from_lookup(|key| (key == ENV_LOG_FORMAT).then(|| "json".to_string()));
        assert_eq!(config.format, Format::Json);
        assert!(!config.display.colors);
    }

    #[test]
    fn presets() {
        assert_eq!(Config::development().format, Format::Pretty);
        assert_eq!(Config::production().format, Format::Json);
        assert!(!Config::production().display.colors);
        assert_eq!(Config::test().level, "trace");
    }

    #[test]
    fn deserializes_partial_document() {
        let config: Config = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, Format::Json);
    }
}
