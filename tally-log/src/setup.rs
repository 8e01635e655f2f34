use std::fmt;

use serde::{Deserialize, Serialize};

/// All crates of the workspace, configured with the log level from [`LogConfig`].
///
/// Third-party crates log at `INFO` unless overridden through `RUST_LOG`.
#[cfg(feature = "init")]
const CRATE_NAMES: &[&str] = &[
    "tally",
    "tally_buckets",
    "tally_config",
    "tally_consumer",
    "tally_event",
    "tally_kafka",
    "tally_log",
    "tally_redis",
    "tally_server",
    "tally_statsd",
    "tally_system",
];

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///   INFO  tally::setup: launching distinct worker
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-02-05T12:10:32.000000Z  INFO tally::setup: launching distinct worker
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2024-02-05T12:11:08.729716Z","level":"INFO","message":"launching distinct worker","target":"tally::setup"}
    /// ```
    Json,
}

/// The maximum verbosity of log messages emitted by Tally's crates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Only errors.
    Error,
    /// Errors and warnings.
    Warn,
    /// Errors, warnings and informational messages.
    Info,
    /// All of the above plus debugging output.
    Debug,
    /// Everything.
    Trace,
}

impl Level {
    /// Returns the directive name of this level as understood by `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`Level`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseLevelError;

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected one of error, warn, info, debug or trace")
    }
}

impl std::error::Error for ParseLevelError {}

impl std::str::FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => return Err(ParseLevelError),
        })
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for Tally.
    pub level: Level,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: LogFormat::Auto,
        }
    }
}

/// Builds the default filter directives for the given level.
#[cfg(feature = "init")]
fn default_directives(level: Level) -> String {
    // Configure INFO as default for all third-party crates. The Kafka client and the SQL driver
    // are very spammy on INFO, so configure a higher warn level.
    let mut directives = String::from("info,rdkafka=warn,sqlx=warn");
    for name in CRATE_NAMES {
        directives.push(',');
        directives.push_str(name);
        directives.push('=');
        directives.push_str(level.as_str());
    }
    directives
}

/// Initialize the logging system.
///
/// If the `RUST_LOG` environment variable is set, its directives take precedence over the level
/// in the configuration. Calling this function more than once has no effect.
///
/// # Example
///
/// ```ignore
/// let log_config = tally_log::LogConfig::default();
/// tally_log::init(&log_config);
/// ```
#[cfg(feature = "init")]
pub fn init(config: &LogConfig) {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match (config.format, std::io::stderr().is_terminal()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => subscriber.pretty().try_init(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            subscriber.with_ansi(false).try_init()
        }
        (LogFormat::Json, _) => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .try_init(),
    };

    if result.is_err() {
        crate::debug!("logging was already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, LogFormat::Auto);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("DEBUG".parse(), Ok(Level::Debug));
        assert_eq!("warn".parse(), Ok(Level::Warn));
        assert_eq!("verbose".parse::<Level>(), Err(ParseLevelError));
    }

    #[test]
    fn test_log_config_parse() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level": "trace", "format": "json"}"#).unwrap();
        assert_eq!(config.level, Level::Trace);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Trace);
        assert_eq!(Level::Debug.to_string(), "debug");
    }

    #[cfg(feature = "init")]
    #[test]
    fn test_default_directives() {
        let directives = default_directives(Level::Debug);
        assert!(directives.starts_with("info,"));
        assert!(directives.contains("tally_buckets=debug"));
    }
}
