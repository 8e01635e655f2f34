use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use tally_buckets::{
    ConsolidationConfig, ConsolidationService, Consolidator, DistinctHandler, RedisBucketStore,
};
use tally_config::Config;
use tally_consumer::ConsumerService;
use tally_kafka::{KafkaConsumer, KafkaProducer};
use tally_redis::AsyncRedisPool;
use tally_server::{
    FirstSeenHandler, FirstSeenStore, HourlyLogs, HttpServer, PurgeService, RawLogHandler,
    RawLogStore, ServiceState, routes,
};
use tally_statsd::MetricsClientConfig;
use tally_system::{Controller, ServiceSet, SystemClock};

/// The processes that `tally run` can start.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Worker {
    /// Accepts events over HTTP and publishes them to Kafka.
    Collector,
    /// Counts events in daily buckets and consolidates them.
    Distinct,
    /// Records the first event of every user.
    FirstSeen,
    /// Keeps recent events for the hourly reports.
    RawLog,
}

impl Worker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collector => "collector",
            Self::Distinct => "distinct",
            Self::FirstSeen => "first-seen",
            Self::RawLog => "raw-log",
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Worker {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "collector" => Self::Collector,
            "distinct" => Self::Distinct,
            "first-seen" => Self::FirstSeen,
            "raw-log" => Self::RawLog,
            _ => anyhow::bail!("unknown worker {s:?}"),
        })
    }
}

pub fn check_config(config: &Config, worker: Worker) -> Result<()> {
    if worker != Worker::Collector && config.first_seen_path() == config.raw_log_path() {
        anyhow::bail!(
            "first_seen.path and raw_log.path point to the same database {}",
            config.raw_log_path().display()
        );
    }

    if worker == Worker::RawLog && !config.purge_enabled() {
        tally_log::warn!("raw log purge is disabled, events are kept forever");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config, worker: Worker) {
    if config.path().as_os_str().is_empty() {
        tally_log::info!("launching tally without config folder");
    } else {
        tally_log::info!(
            "launching tally from config folder {}",
            config.path().display()
        );
    }
    tally_log::info!("  worker: {worker}");
    tally_log::info!("  log level: {}", config.logging().level);

    let kafka = config.kafka();
    tally_log::info!("  kafka: {} (topic {})", kafka.brokers, kafka.topic);

    match worker {
        Worker::Collector => {
            tally_log::info!("  listen address: {}", config.listen_addr());
        }
        Worker::Distinct => {
            tally_log::info!("  redis: {}", config.redis().server());
            tally_log::info!("  bucket prefix: {}", config.bucket_prefix());
            tally_log::info!("  consolidation: {}", config.consolidation_enabled());
        }
        Worker::FirstSeen => {
            tally_log::info!("  database: {}", config.first_seen_path().display());
        }
        Worker::RawLog => {
            tally_log::info!("  database: {}", config.raw_log_path().display());
            tally_log::info!("  retention: {}s", config.raw_log_retention().as_secs());
        }
    }
}

pub fn init_logging(config: &Config) {
    tally_log::init(config.logging());
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    tally_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags: config.metrics_default_tags().clone(),
    })
    .with_context(|| format!("failed to set up statsd at {host}"))?;

    Ok(())
}

/// Starts the services of a worker and runs them until a shutdown signal arrives.
pub async fn run(config: Config, worker: Worker) -> Result<()> {
    let controller = Controller::new(config.shutdown_timeout());
    let mut services = ServiceSet::new();

    match worker {
        Worker::Collector => start_collector(&config, &controller, &mut services).await?,
        Worker::Distinct => start_distinct(&config, &controller, &mut services).await?,
        Worker::FirstSeen => start_first_seen(&config, &controller, &mut services).await?,
        Worker::RawLog => start_raw_log(&config, &controller, &mut services).await?,
    }

    controller.run_until_signal().await;

    if let Some(shutdown) = controller.shutdown_handle().get() {
        tally_log::info!("shutting down {} services", services.len());
        services.join(shutdown).await;
    }

    Ok(())
}

async fn start_collector(
    config: &Config,
    controller: &Controller,
    services: &mut ServiceSet,
) -> Result<()> {
    let producer =
        KafkaProducer::create(config.kafka()).context("failed to create the kafka producer")?;

    let mut state = ServiceState::new(producer, SystemClock, config.response_buffer_size());

    // The raw-log worker creates the database. Hourly reports are served once it exists.
    let raw_log_path = config.raw_log_path();
    if raw_log_path.exists() {
        let store = RawLogStore::open(&raw_log_path)
            .await
            .context("failed to open the raw log")?;
        state = state.with_hourly_logs(HourlyLogs::new(store, config.raw_log_retention()));
    } else {
        tally_log::info!("no raw log found, hourly reports are disabled");
    }

    let server = HttpServer::bind(
        config.listen_addr(),
        routes(state),
        controller.shutdown_handle(),
    )
    .with_context(|| format!("failed to listen on {}", config.listen_addr()))?;
    services.start(server);

    Ok(())
}

async fn start_distinct(
    config: &Config,
    controller: &Controller,
    services: &mut ServiceSet,
) -> Result<()> {
    let pool = AsyncRedisPool::from_config(config.redis())
        .context("failed to create the redis pool")?;
    pool.ping().await.context("failed to connect to redis")?;
    let store = RedisBucketStore::new(pool);

    let consumer = KafkaConsumer::subscribe(config.kafka(), Worker::Distinct.as_str())
        .context("failed to subscribe to kafka")?;

    services.start(ConsumerService::new(
        "distinct",
        consumer,
        DistinctHandler::new(store.clone(), config.bucket_prefix()),
        controller.shutdown_handle(),
    ));

    if config.consolidation_enabled() {
        let consolidator = Consolidator::new(
            store,
            SystemClock,
            ConsolidationConfig {
                prefix: config.bucket_prefix().to_owned(),
                retention_days: config.bucket_retention_days(),
                interval: config.consolidation_interval(),
                max_days_per_cycle: config.consolidation_max_days(),
            },
        );
        services.start(ConsolidationService::new(
            consolidator,
            controller.shutdown_handle(),
        ));
    }

    Ok(())
}

async fn start_first_seen(
    config: &Config,
    controller: &Controller,
    services: &mut ServiceSet,
) -> Result<()> {
    let store = FirstSeenStore::open(&config.first_seen_path())
        .await
        .context("failed to open the first-seen database")?;

    let consumer = KafkaConsumer::subscribe(config.kafka(), Worker::FirstSeen.as_str())
        .context("failed to subscribe to kafka")?;

    services.start(ConsumerService::new(
        "first-seen",
        consumer,
        FirstSeenHandler::new(store),
        controller.shutdown_handle(),
    ));

    Ok(())
}

async fn start_raw_log(
    config: &Config,
    controller: &Controller,
    services: &mut ServiceSet,
) -> Result<()> {
    let store = RawLogStore::open(&config.raw_log_path())
        .await
        .context("failed to open the raw log")?;

    let consumer = KafkaConsumer::subscribe(config.kafka(), Worker::RawLog.as_str())
        .context("failed to subscribe to kafka")?;

    services.start(ConsumerService::new(
        "raw-log",
        consumer,
        RawLogHandler::new(store.clone()),
        controller.shutdown_handle(),
    ));

    if config.purge_enabled() {
        services.start(PurgeService::new(
            store,
            SystemClock,
            config.raw_log_retention(),
            config.purge_interval(),
            controller.shutdown_handle(),
        ));
    }

    Ok(())
}
