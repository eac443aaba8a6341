use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the offline-worker binary.
#[derive(Debug, Parser)]
#[command(
    name = "offline-worker",
    version,
    about = "Offline caching worker and request interceptor"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "OFFLINE_WORKER_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Install and activate the worker, then serve intercepted requests.
    Serve(Box<ServeArgs>),
    /// Install and activate the worker, then run one prefetch job.
    Prefetch(PrefetchArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub worker: WorkerOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerOverrides {
    /// Override the origin the worker serves and fetches from.
    #[arg(long = "origin", value_name = "URL")]
    pub origin: Option<String>,

    /// Override the cache version; bumping it invalidates every cached entry.
    #[arg(long = "cache-version", value_name = "VERSION")]
    pub cache_version: Option<String>,

    /// Override the number of resources prefetched concurrently.
    #[arg(long = "prefetch-batch-size", value_name = "COUNT")]
    pub prefetch_batch_size: Option<u64>,

    /// Keep cache generations in this directory between runs.
    #[arg(long = "cache-dir", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PrefetchArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub worker: WorkerOverrides,

    /// Re-fetch resources that are already cached.
    #[arg(long = "force", action = clap::ArgAction::SetTrue)]
    pub force: bool,

    /// Paths relative to the origin, or absolute URLs.
    #[arg(value_name = "RESOURCE", required = true)]
    pub resources: Vec<String>,
}
