use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_kafka::KafkaConfig;
use tally_log::LogConfig;
use tally_redis::RedisConfig;

type BoxError = Box<dyn Error + Send + Sync>;

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<BoxError>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap(inner: impl Into<BoxError>, kind: ConfigErrorKind) -> Self {
        Self {
            inner: Some(inner.into()),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field(inner: impl Into<BoxError>, field: &'static str) -> Self {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => self.kind.fmt(f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.yml", Self::name()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }
}

/// Values of the configuration that can be overridden from the command line or environment.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the HTTP server should bind to (network interface).
    pub host: Option<String>,
    /// The port to bind for the HTTP server.
    pub port: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
    /// The kafka `bootstrap.servers` configuration string.
    pub kafka_url: Option<String>,
    /// The kafka topic carrying all events.
    pub kafka_topic: Option<String>,
    /// The redis server url.
    pub redis_url: Option<String>,
    /// The statsd host and port.
    pub statsd: Option<String>,
    /// Path of the SQLite database of the first-seen worker.
    pub first_seen_path: Option<String>,
    /// Path of the SQLite database of the raw-log worker.
    pub raw_log_path: Option<String>,
    /// "true" if the consolidation of daily buckets runs, "false" otherwise.
    pub consolidation: Option<String>,
    /// Shutdown timeout in seconds.
    pub shutdown_timeout: Option<String>,
}

/// Controls internal reporting to statsd.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Metrics {
    /// Host and port of the statsd server. Metrics are disabled if not set.
    pub statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    pub prefix: String,
    /// Default tags to apply to all outgoing metrics.
    pub default_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "tally".to_owned(),
            default_tags: BTreeMap::new(),
        }
    }
}

/// Settings of the HTTP ingestion server.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Http {
    /// The host the server binds to.
    pub host: IpAddr,
    /// The port the server binds to.
    pub port: u16,
    /// Number of recent response times kept for the average in `/stats`.
    pub response_buffer_size: usize,
}

impl Default for Http {
    fn default() -> Self {
        Http {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            response_buffer_size: 256,
        }
    }
}

/// Settings of the consolidation of daily buckets into monthly buckets.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Consolidation {
    /// Whether the distinct worker runs the consolidation.
    pub enabled: bool,
    /// Prefix of all bucket keys.
    pub prefix: String,
    /// Number of days a daily bucket is kept before it is consolidated.
    pub retention_days: u32,
    /// Seconds between two consolidation cycles.
    pub interval: u64,
    /// Maximum number of days consolidated in a single cycle.
    pub max_days_per_cycle: u32,
}

impl Default for Consolidation {
    fn default() -> Self {
        Consolidation {
            enabled: true,
            prefix: "metrics-distinct".to_owned(),
            retention_days: 30,
            interval: 24 * 60 * 60,
            max_days_per_cycle: 366,
        }
    }
}

/// Settings of the first-seen worker.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct FirstSeen {
    /// Path of the SQLite database, relative to the config folder.
    pub path: PathBuf,
}

impl Default for FirstSeen {
    fn default() -> Self {
        FirstSeen {
            path: PathBuf::from("first_seen.db"),
        }
    }
}

/// Settings of the raw-log worker.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct RawLog {
    /// Path of the SQLite database, relative to the config folder.
    pub path: PathBuf,
    /// Seconds a raw event is kept.
    pub retention: u64,
    /// Whether the raw-log worker purges expired events.
    pub purge_enabled: bool,
    /// Seconds between two purges.
    pub purge_interval: u64,
}

impl Default for RawLog {
    fn default() -> Self {
        RawLog {
            path: PathBuf::from("raw_log.db"),
            retention: 60 * 60,
            purge_enabled: true,
            purge_interval: 30 * 60,
        }
    }
}

fn default_shutdown_timeout() -> u64 {
    10
}

#[derive(Serialize, Deserialize, Debug)]
struct ConfigValues {
    #[serde(default)]
    logging: LogConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    http: Http,
    #[serde(default)]
    kafka: KafkaConfig,
    #[serde(default)]
    redis: RedisConfig,
    #[serde(default)]
    consolidation: Consolidation,
    #[serde(default)]
    first_seen: FirstSeen,
    #[serde(default)]
    raw_log: RawLog,
    #[serde(default = "default_shutdown_timeout")]
    shutdown_timeout: u64,
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self {
            logging: LogConfig::default(),
            metrics: Metrics::default(),
            http: Http::default(),
            kafka: KafkaConfig::default(),
            redis: RedisConfig::default(),
            consolidation: Consolidation::default(),
            first_seen: FirstSeen::default(),
            raw_log: RawLog::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// A folder without `config.yml` yields the default configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = if Self::config_exists(&path) {
            ConfigValues::load(&path)?
        } else {
            ConfigValues::default()
        };

        let config = Config { values, path };
        config.validate().map_err(|e| e.file(ConfigValues::path(&config.path)))?;
        Ok(config)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config = Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let http = &mut self.values.http;

        if let Some(host) = overrides.host {
            http.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            http.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(kafka_url) = overrides.kafka_url {
            self.values.kafka.brokers = kafka_url;
        }

        if let Some(topic) = overrides.kafka_topic {
            self.values.kafka.topic = topic;
        }

        if let Some(redis) = overrides.redis_url {
            self.values.redis = RedisConfig::Single(redis);
        }

        if let Some(statsd) = overrides.statsd {
            self.values.metrics.statsd = Some(statsd);
        }

        if let Some(path) = overrides.first_seen_path {
            self.values.first_seen.path = PathBuf::from(path);
        }

        if let Some(path) = overrides.raw_log_path {
            self.values.raw_log.path = PathBuf::from(path);
        }

        if let Some(enabled) = overrides.consolidation {
            self.values.consolidation.enabled = match enabled.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" | "" => false,
                _ => {
                    return Err(
                        ConfigError::new(ConfigErrorKind::InvalidValue).field("consolidation")
                    );
                }
            };
        }

        if let Some(shutdown_timeout) = overrides.shutdown_timeout {
            self.values.shutdown_timeout = shutdown_timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "shutdown_timeout"))?;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, message: &str| {
            ConfigError::wrap(message.to_owned(), ConfigErrorKind::InvalidValue).field(field)
        };

        if self.values.http.response_buffer_size < 8 {
            return Err(invalid(
                "http.response_buffer_size",
                "must be at least 8",
            ));
        }

        let consolidation = &self.values.consolidation;
        if consolidation.prefix.is_empty() {
            return Err(invalid("consolidation.prefix", "must not be empty"));
        }
        if consolidation.interval == 0 {
            return Err(invalid("consolidation.interval", "must not be zero"));
        }
        if consolidation.max_days_per_cycle == 0 {
            return Err(invalid(
                "consolidation.max_days_per_cycle",
                "must not be zero",
            ));
        }

        // A consolidation cycle holds the watermark guard while each day takes a second guard.
        if consolidation.enabled && self.values.redis.options().max_connections < 2 {
            return Err(invalid(
                "redis.max_connections",
                "must be at least 2 while consolidation is enabled",
            ));
        }

        if self.values.raw_log.purge_interval == 0 {
            return Err(invalid("raw_log.purge_interval", "must not be zero"));
        }
        if self.values.raw_log.retention == 0 {
            return Err(invalid("raw_log.retention", "must not be zero"));
        }

        self.values
            .kafka
            .validate()
            .map_err(|err| ConfigError::for_field(err, "kafka"))?;

        Ok(())
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server, if metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of all metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags added to all metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.http.host, self.values.http.port)
    }

    /// Returns the number of recent response times used for the average in `/stats`.
    pub fn response_buffer_size(&self) -> usize {
        self.values.http.response_buffer_size
    }

    /// Returns the kafka configuration.
    pub fn kafka(&self) -> &KafkaConfig {
        &self.values.kafka
    }

    /// Returns the redis configuration.
    pub fn redis(&self) -> &RedisConfig {
        &self.values.redis
    }

    /// Returns `true` if the distinct worker consolidates daily buckets.
    pub fn consolidation_enabled(&self) -> bool {
        self.values.consolidation.enabled
    }

    /// Returns the prefix of all bucket keys.
    pub fn bucket_prefix(&self) -> &str {
        &self.values.consolidation.prefix
    }

    /// Returns the number of days a daily bucket is kept before consolidation.
    pub fn bucket_retention_days(&self) -> u32 {
        self.values.consolidation.retention_days
    }

    /// Returns the time between two consolidation cycles.
    pub fn consolidation_interval(&self) -> Duration {
        Duration::from_secs(self.values.consolidation.interval)
    }

    /// Returns the maximum number of days consolidated in a single cycle.
    pub fn consolidation_max_days(&self) -> u32 {
        self.values.consolidation.max_days_per_cycle
    }

    /// Returns the path of the first-seen database.
    pub fn first_seen_path(&self) -> PathBuf {
        self.path.join(&self.values.first_seen.path)
    }

    /// Returns the path of the raw-log database.
    pub fn raw_log_path(&self) -> PathBuf {
        self.path.join(&self.values.raw_log.path)
    }

    /// Returns how long raw events are kept.
    pub fn raw_log_retention(&self) -> Duration {
        Duration::from_secs(self.values.raw_log.retention)
    }

    /// Returns `true` if the raw-log worker purges expired events.
    pub fn purge_enabled(&self) -> bool {
        self.values.raw_log.purge_enabled
    }

    /// Returns the time between two purges of expired raw events.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.values.raw_log.purge_interval)
    }

    /// Returns the time services are given to finish in-flight work on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.shutdown_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}
