// This module implements the definition of the command line app.
use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command, value_parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Tally collects user activity events and aggregates them per day.";

/// Names of the workers that can be passed to `tally run`.
pub const WORKERS: &[&str] = &["collector", "distinct", "first-seen", "raw-log"];

fn override_arg(name: &'static str, long: &'static str, env: &'static str) -> Arg {
    Arg::new(name)
        .long(long)
        .env(env)
        .global(true)
        .value_parser(ValueParser::string())
}

pub fn make_app() -> Command {
    Command::new("tally")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .env("TALLY_CONFIG")
                .default_value(".tally")
                .value_parser(value_parser!(std::path::PathBuf))
                .help("The path to the config folder."),
        )
        .arg(
            override_arg("host", "host", "TALLY_HOST")
                .value_name("HOST")
                .help("The network interface the collector binds to."),
        )
        .arg(
            override_arg("port", "port", "TALLY_PORT")
                .short('p')
                .value_name("PORT")
                .help("The port the collector binds to."),
        )
        .arg(
            override_arg("log_level", "log-level", "TALLY_LOG_LEVEL")
                .value_name("LEVEL")
                .help("The log level: error, warn, info, debug or trace."),
        )
        .arg(
            override_arg("kafka_url", "kafka-url", "TALLY_KAFKA_URL")
                .value_name("KAFKA_URL")
                .help("Kafka bootstrap servers, for example `localhost:9092`."),
        )
        .arg(
            override_arg("kafka_topic", "kafka-topic", "TALLY_KAFKA_TOPIC")
                .value_name("TOPIC")
                .help("The Kafka topic carrying all events."),
        )
        .arg(
            override_arg("redis_url", "redis-url", "TALLY_REDIS_URL")
                .value_name("REDIS_URL")
                .help("Redis server URL, for example `redis://127.0.0.1`."),
        )
        .arg(
            override_arg("statsd", "statsd", "TALLY_STATSD")
                .value_name("HOST:PORT")
                .help("Report internal metrics to this statsd server."),
        )
        .arg(
            override_arg("first_seen_path", "first-seen-path", "TALLY_FIRST_SEEN_PATH")
                .value_name("PATH")
                .help("The SQLite database of the first-seen worker."),
        )
        .arg(
            override_arg("raw_log_path", "raw-log-path", "TALLY_RAW_LOG_PATH")
                .value_name("PATH")
                .help("The SQLite database of the raw-log worker."),
        )
        .arg(
            override_arg("consolidation", "consolidation", "TALLY_CONSOLIDATION")
                .value_name("BOOL")
                .help("Enables or disables the consolidation of daily buckets."),
        )
        .arg(
            override_arg("shutdown_timeout", "shutdown-timeout", "TALLY_SHUTDOWN_TIMEOUT")
                .value_name("SECONDS")
                .help("Maximum time to wait for services to stop on a graceful shutdown."),
        )
        .subcommand(
            Command::new("run")
                .about("Run one of the Tally workers")
                .after_help(
                    "This runs the worker in the foreground until it's shut down. \
                     Ctrl-C and SIGTERM shut down gracefully, finishing the event \
                     in flight. SIGQUIT shuts down immediately.",
                )
                .arg(
                    Arg::new("worker")
                        .value_name("WORKER")
                        .required(true)
                        .value_parser(WORKERS.to_vec())
                        .help("The worker to run."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the Tally config")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config out for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values \
                             which are not in the config file but filled in from \
                             defaults and overrides. The default output format is \
                             YAML but a debug format can also be specified which is \
                             useful to understand how Tally interprets the \
                             individual values.",
                        )
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .value_parser(["debug", "yaml"])
                                .default_value("yaml")
                                .action(ArgAction::Set)
                                .help("The output format"),
                        ),
                ),
        )
}
