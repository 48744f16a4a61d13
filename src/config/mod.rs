//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, time::Duration};

use clap::{builder::BoolishValueParser, Args, Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::ReconnectPolicy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "switchyard";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_EDGE_PORT: u16 = 8701;
const DEFAULT_INTERNAL_PORT: u16 = 8702;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DELIVERY_WORKERS: usize = 20;
const DEFAULT_MISS_CACHE_LIMIT: usize = 10_000;

/// Command-line arguments for the Switchyard edge binary.
#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about = "Switchyard edge cache node")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SWITCHYARD_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the edge cache node.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public (SDK-facing) listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the internal listener host.
    #[arg(long = "server-internal-host", value_name = "HOST")]
    pub server_internal_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-edge-port", value_name = "PORT")]
    pub edge_port: Option<u16>,

    /// Override the internal listener port.
    #[arg(long = "server-internal-port", value_name = "PORT")]
    pub internal_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub graceful_shutdown_seconds: Option<u64>,

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

    /// Override the management server base URL.
    #[arg(long = "upstream-url", value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Override the API key used to authenticate fetch-through calls.
    #[arg(long = "upstream-api-key", value_name = "KEY")]
    pub upstream_api_key: Option<String>,

    /// Override the fetch-through request timeout.
    #[arg(long = "upstream-timeout-seconds", value_name = "SECONDS")]
    pub upstream_timeout_seconds: Option<u64>,

    /// Override the event delivery worker count.
    #[arg(long = "events-delivery-workers", value_name = "COUNT")]
    pub events_delivery_workers: Option<usize>,

    /// Override the cache reconnect policy
    /// (wipe_on_disconnect|serve_stale_wipe_on_reconnect).
    #[arg(long = "cache-reconnect-policy", value_name = "POLICY")]
    pub cache_reconnect_policy: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and
/// validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub events: EventsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub edge_addr: SocketAddr,
    pub internal_addr: SocketAddr,
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
pub struct UpstreamSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub environment_miss_limit: usize,
    pub credential_miss_limit: usize,
    pub resolved_pair_limit: usize,
    pub reconnect_policy: ReconnectPolicy,
}

#[derive(Debug, Clone)]
pub struct EventsSettings {
    pub delivery_workers: NonZeroUsize,
    /// Treat the event stream as connected at startup. On for the HTTP
    /// event binding, which has no liveness of its own; a broker binding
    /// drives the orchestrator from its real connection state instead.
    pub assume_connected: bool,
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

/// Parse the CLI and load settings with the configured precedence.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SWITCHYARD").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
    events: RawEventsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_internal_host.as_ref() {
            self.server.internal_host = Some(host.clone());
        }
        if let Some(port) = overrides.edge_port {
            self.server.edge_port = Some(port);
        }
        if let Some(port) = overrides.internal_port {
            self.server.internal_port = Some(port);
        }
        if let Some(seconds) = overrides.graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.upstream.url = Some(url.clone());
        }
        if let Some(key) = overrides.upstream_api_key.as_ref() {
            self.upstream.api_key = Some(key.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
        if let Some(workers) = overrides.events_delivery_workers {
            self.events.delivery_workers = Some(workers);
        }
        if let Some(policy) = overrides.cache_reconnect_policy.as_ref() {
            self.cache.reconnect_policy = Some(policy.clone());
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    internal_host: Option<String>,
    edge_port: Option<u16>,
    internal_port: Option<u16>,
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
struct RawUpstreamSettings {
    url: Option<String>,
    api_key: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    environment_miss_limit: Option<usize>,
    credential_miss_limit: Option<usize>,
    resolved_pair_limit: Option<usize>,
    reconnect_policy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventsSettings {
    delivery_workers: Option<usize>,
    assume_connected: Option<bool>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let edge_addr = parse_addr(
            raw.server.host.as_deref().unwrap_or(DEFAULT_HOST),
            raw.server.edge_port.unwrap_or(DEFAULT_EDGE_PORT),
            "server.host",
        )?;
        let internal_addr = parse_addr(
            raw.server
                .internal_host
                .as_deref()
                .or(raw.server.host.as_deref())
                .unwrap_or(DEFAULT_HOST),
            raw.server.internal_port.unwrap_or(DEFAULT_INTERNAL_PORT),
            "server.internal_host",
        )?;

        let level = match raw.logging.level.as_deref() {
            None => LevelFilter::INFO,
            Some(value) => value
                .parse::<LevelFilter>()
                .map_err(|err| LoadError::invalid("logging.level", err.to_string()))?,
        };
        let format = match raw.logging.json.unwrap_or(false) {
            true => LogFormat::Json,
            false => LogFormat::Compact,
        };

        let reconnect_policy = match raw.cache.reconnect_policy.as_deref() {
            None => ReconnectPolicy::default(),
            Some("wipe_on_disconnect") => ReconnectPolicy::WipeOnDisconnect,
            Some("serve_stale_wipe_on_reconnect") => ReconnectPolicy::ServeStaleWipeOnReconnect,
            Some(other) => {
                return Err(LoadError::invalid(
                    "cache.reconnect_policy",
                    format!("unknown policy `{other}`"),
                ));
            }
        };

        let delivery_workers = raw
            .events
            .delivery_workers
            .unwrap_or(DEFAULT_DELIVERY_WORKERS);
        let delivery_workers = NonZeroUsize::new(delivery_workers).ok_or_else(|| {
            LoadError::invalid("events.delivery_workers", "must be greater than zero")
        })?;

        Ok(Self {
            server: ServerSettings {
                edge_addr,
                internal_addr,
                graceful_shutdown: Duration::from_secs(
                    raw.server
                        .graceful_shutdown_seconds
                        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
                ),
            },
            logging: LoggingSettings { level, format },
            upstream: UpstreamSettings {
                base_url: raw.upstream.url,
                api_key: raw.upstream.api_key,
                timeout: Duration::from_secs(
                    raw.upstream
                        .timeout_seconds
                        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
                ),
            },
            cache: CacheSettings {
                environment_miss_limit: raw
                    .cache
                    .environment_miss_limit
                    .unwrap_or(DEFAULT_MISS_CACHE_LIMIT),
                credential_miss_limit: raw
                    .cache
                    .credential_miss_limit
                    .unwrap_or(DEFAULT_MISS_CACHE_LIMIT),
                resolved_pair_limit: raw
                    .cache
                    .resolved_pair_limit
                    .unwrap_or(DEFAULT_MISS_CACHE_LIMIT),
                reconnect_policy,
            },
            events: EventsSettings {
                delivery_workers,
                assume_connected: raw.events.assume_connected.unwrap_or(true),
            },
        })
    }
}

fn parse_addr(host: &str, port: u16, key: &'static str) -> Result<SocketAddr, LoadError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|_| LoadError::invalid(key, format!("`{host}:{port}` is not a valid address")))
}
