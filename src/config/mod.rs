//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::worker::config::{
    DEFAULT_CACHE_PREFIX, DEFAULT_CACHE_VERSION, DEFAULT_PREFETCH_BATCH_SIZE, DEFAULT_SEED_PATHS,
    WorkerConfig,
};

pub use cli::{
    CliArgs, Command, LoggingOverrides, PrefetchArgs, ServeArgs, ServeOverrides, WorkerOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "offline-worker";
const ENV_PREFIX: &str = "OFFLINE_WORKER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000/";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Site the worker sits in front of. Relative resources resolve here.
    pub origin: Url,
    pub cache_prefix: String,
    pub cache_version: String,
    pub seed_paths: Vec<String>,
    pub prefetch_batch_size: NonZeroUsize,
    /// Per-generation body budget; unlimited when unset.
    pub cache_quota_bytes: Option<NonZeroUsize>,
    /// Directory holding cache generations across runs. In-memory when unset.
    pub cache_dir: Option<PathBuf>,
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        WorkerConfig::new(
            settings.origin.clone(),
            &settings.cache_prefix,
            &settings.cache_version,
        )
        .with_seed_paths(settings.seed_paths.clone())
        .with_prefetch_batch_size(settings.prefetch_batch_size)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("worker.seed_paths")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Prefetch(args)) => {
            raw.apply_logging_overrides(&args.logging);
            raw.apply_worker_overrides(&args.worker);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    worker: RawWorkerSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }

        self.apply_logging_overrides(&overrides.logging);
        self.apply_worker_overrides(&overrides.worker);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_worker_overrides(&mut self, overrides: &WorkerOverrides) {
        if let Some(origin) = overrides.origin.as_ref() {
            self.worker.origin = Some(origin.clone());
        }
        if let Some(version) = overrides.cache_version.as_ref() {
            self.worker.cache_version = Some(version.clone());
        }
        if let Some(size) = overrides.prefetch_batch_size {
            self.worker.prefetch_batch_size = Some(size);
        }
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.worker.cache_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            worker,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let worker = build_worker_settings(worker)?;

        Ok(Self {
            server,
            logging,
            worker,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_worker_settings(worker: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    let origin = parse_origin(worker.origin.as_deref().unwrap_or(DEFAULT_ORIGIN))
        .map_err(|reason| LoadError::invalid("worker.origin", reason))?;

    let cache_prefix = non_blank(
        worker.cache_prefix,
        DEFAULT_CACHE_PREFIX,
        "worker.cache_prefix",
    )?;
    let cache_version = non_blank(
        worker.cache_version,
        DEFAULT_CACHE_VERSION,
        "worker.cache_version",
    )?;

    let seed_paths = match worker.seed_paths {
        Some(paths) => {
            let paths: Vec<String> = paths
                .into_iter()
                .map(|path| path.trim().to_string())
                .filter(|path| !path.is_empty())
                .collect();
            if paths.is_empty() {
                return Err(LoadError::invalid(
                    "worker.seed_paths",
                    "at least one seed path is required",
                ));
            }
            paths
        }
        None => DEFAULT_SEED_PATHS.iter().map(|p| p.to_string()).collect(),
    };

    let prefetch_batch_size = non_zero_usize(
        worker
            .prefetch_batch_size
            .unwrap_or(DEFAULT_PREFETCH_BATCH_SIZE as u64),
        "worker.prefetch_batch_size",
    )?;

    let cache_quota_bytes = worker
        .cache_quota_bytes
        .map(|value| non_zero_usize(value, "worker.cache_quota_bytes"))
        .transpose()?;

    let cache_dir = worker
        .cache_dir
        .filter(|dir| !dir.as_os_str().is_empty());

    Ok(WorkerSettings {
        origin,
        cache_prefix,
        cache_version,
        seed_paths,
        prefetch_batch_size,
        cache_quota_bytes,
        cache_dir,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    origin: Option<String>,
    cache_prefix: Option<String>,
    cache_version: Option<String>,
    seed_paths: Option<Vec<String>>,
    prefetch_batch_size: Option<u64>,
    cache_quota_bytes: Option<u64>,
    cache_dir: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_origin(value: &str) -> Result<Url, String> {
    let url = Url::parse(value.trim()).map_err(|err| format!("invalid URL `{value}`: {err}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err(format!("`{value}` has no host"));
    }
    Ok(url)
}

fn non_blank(value: Option<String>, default: &str, key: &'static str) -> Result<String, LoadError> {
    match value {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(key, "must not be empty"));
            }
            Ok(trimmed.to_string())
        }
        None => Ok(default.to_string()),
    }
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
