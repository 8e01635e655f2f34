use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use tally_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup::{self, Worker};

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(".tally"));

    let mut config = Config::from_path(&config_path)?;
    config.apply_override(extract_config_args(&matches))?;

    match matches.subcommand() {
        Some(("run", matches)) => {
            let worker = matches
                .get_one::<String>("worker")
                .ok_or_else(|| anyhow!("no worker given"))?
                .parse()?;
            run(config, worker)
        }
        Some(("config", matches)) => manage_config(&config, matches),
        _ => unreachable!(),
    }
}

/// Extracts the config overrides from the command line and the environment.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let value = |name: &str| matches.get_one::<String>(name).cloned();

    OverridableConfig {
        host: value("host"),
        port: value("port"),
        log_level: value("log_level"),
        kafka_url: value("kafka_url"),
        kafka_topic: value("kafka_topic"),
        redis_url: value("redis_url"),
        statsd: value("statsd"),
        first_seen_path: value("first_seen_path"),
        raw_log_path: value("raw_log_path"),
        consolidation: value("consolidation"),
        shutdown_timeout: value("shutdown_timeout"),
    }
}

pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", matches)) => dump_config(config, matches),
        _ => unreachable!(),
    }
}

#[allow(clippy::print_stdout)]
pub fn dump_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.get_one::<String>("format").map(String::as_str) {
        Some("debug") => println!("{config:#?}"),
        Some("yaml") | None => println!(
            "{}",
            config
                .to_yaml_string()
                .context("failed to serialize the config")?
        ),
        Some(other) => return Err(anyhow!("unsupported format {other}")),
    }

    Ok(())
}

pub fn run(config: Config, worker: Worker) -> Result<()> {
    setup::init_logging(&config);
    setup::check_config(&config, worker)?;
    setup::dump_spawn_infos(&config, worker);
    setup::init_metrics(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tally-worker")
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(setup::run(config, worker))?;

    tally_log::info!("tally shutdown complete");
    Ok(())
}
