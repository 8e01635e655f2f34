use serde::{Deserialize, Serialize};

const fn default_max_connections() -> u32 {
    24
}

const fn default_connection_timeout() -> u64 {
    5
}

/// Additional configuration options for a redis client.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct RedisConfigOptions {
    /// Maximum number of connections managed by the pool.
    ///
    /// Consolidation guards the watermark and the day it merges on separate connections, so it
    /// needs at least two.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a connection, both for a free pooled one and for a new one.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

impl Default for RedisConfigOptions {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

/// Configuration for connecting a redis client.
///
/// Cluster deployments are not supported: consolidation watches several keys at once, which
/// requires all bucket keys of a month to live on one node.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum RedisConfig {
    /// Connect to a single Redis instance.
    ///
    /// Contains the `redis://` url to the node.
    Single(String),

    /// Connect to a single Redis instance.
    ///
    /// Allows to provide more configuration options, e.g. `max_connections`.
    SingleWithOpts {
        /// Contains the `redis://` url to the node.
        server: String,

        /// Additional configuration options for the redis client and a connections pool.
        #[serde(flatten)]
        options: RedisConfigOptions,
    },
}

impl RedisConfig {
    /// Returns the `redis://` url of the server.
    pub fn server(&self) -> &str {
        match self {
            Self::Single(server) => server,
            Self::SingleWithOpts { server, .. } => server,
        }
    }

    /// Returns the pool options, falling back to defaults for the plain url form.
    pub fn options(&self) -> RedisConfigOptions {
        match self {
            Self::Single(_) => RedisConfigOptions::default(),
            Self::SingleWithOpts { options, .. } => options.clone(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::Single("redis://127.0.0.1:6379".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_single_opts() {
        let yaml = r###"
server: "redis://127.0.0.1:6379"
max_connections: 42
"###;

        let config: RedisConfig = serde_yaml::from_str(yaml)
            .expect("Parsed redis config: single with options");

        match config {
            RedisConfig::SingleWithOpts { server, options } => {
                assert_eq!(options.max_connections, 42);
                assert_eq!(options.connection_timeout, 5);
                assert_eq!(server, "redis://127.0.0.1:6379");
            }
            e => panic!("Expected RedisConfig::SingleWithOpts but got {e:?}"),
        }
    }

    #[test]
    fn test_redis_single() {
        let yaml = r###"
"redis://10.0.0.2:6379"
"###;

        let config: RedisConfig =
            serde_yaml::from_str(yaml).expect("Parsed redis config: single url");

        assert_eq!(config, RedisConfig::Single("redis://10.0.0.2:6379".to_owned()));
        assert_eq!(config.server(), "redis://10.0.0.2:6379");
        assert_eq!(config.options().max_connections, 24);
    }
}
