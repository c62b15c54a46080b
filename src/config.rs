//! Configuration management for the pool miner
//!
//! Supports configuration via command line arguments, environment variables
//! (`POOL_MINER_*`) and configuration files (YAML/JSON). Values given on the
//! command line or in the environment take precedence over the file.

use crate::pool::PoolSettings;
use crate::protocol::Framing;
use crate::resolver::DEFAULT_ENDPOINT_URL;
use crate::utils::parse_duration;
use crate::worker::WorkKind;
use crate::{Error, Result, ServerEndpoint, Username};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Log levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Complete configuration for the pool miner
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "pool-miner",
    version = env!("CARGO_PKG_VERSION"),
    about = "Pool mining client",
    long_about = "Connects to a mining pool with several parallel sessions, keeps them busy and restarts the whole pool when throughput stalls"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(skip)]
    pub info: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Query the account balance once and exit
    #[arg(long)]
    #[serde(skip)]
    pub balance: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE", env = "POOL_MINER_CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Pool username; prompted for when missing
    #[arg(env = "POOL_MINER_USERNAME")]
    pub username: Option<String>,

    /// Number of parallel sessions; prompted for when missing
    #[arg(env = "POOL_MINER_THREADS")]
    pub threads: Option<usize>,

    /// URL of the two-line file publishing the pool address
    #[arg(long, env = "POOL_MINER_ENDPOINT_URL", default_value = DEFAULT_ENDPOINT_URL)]
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// Pool host, skips endpoint resolution (requires --port)
    #[arg(long, env = "POOL_MINER_HOST")]
    pub host: Option<String>,

    /// Pool port (requires --host)
    #[arg(long, env = "POOL_MINER_PORT")]
    pub port: Option<u16>,

    /// Response framing
    #[arg(long, value_enum, env = "POOL_MINER_FRAMING", default_value_t = Framing::Line)]
    #[serde(default)]
    pub framing: Framing,

    /// Work function
    #[arg(long, value_enum, env = "POOL_MINER_WORK", default_value_t = WorkKind::HashSearch)]
    #[serde(default)]
    pub work: WorkKind,

    /// Per-job delay of the constant-delay work function
    #[arg(long, env = "POOL_MINER_CONSTANT_DELAY", default_value = "100ms", value_parser = parse_duration_arg)]
    #[serde(default = "default_constant_delay")]
    pub constant_delay: String,

    /// Throughput sampling interval
    #[arg(long, env = "POOL_MINER_MONITOR_INTERVAL", default_value = "1s", value_parser = parse_duration_arg)]
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: String,

    /// Delay before each restart attempt
    #[arg(long, env = "POOL_MINER_RESTART_DELAY", default_value = "5s", value_parser = parse_duration_arg)]
    #[serde(default = "default_restart_delay")]
    pub restart_delay: String,

    /// Pause between consecutive session connects
    #[arg(long, env = "POOL_MINER_STAGGER", default_value = "1s", value_parser = parse_duration_arg)]
    #[serde(default = "default_stagger")]
    pub stagger: String,

    /// Per-read timeout on pool connections (default: none)
    #[arg(long, env = "POOL_MINER_READ_TIMEOUT", value_parser = parse_duration_arg)]
    pub read_timeout: Option<String>,

    /// Upper bound on each handshake with the pool
    #[arg(long, env = "POOL_MINER_HANDSHAKE_TIMEOUT", default_value = "2s", value_parser = parse_duration_arg)]
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: String,

    /// Timeout for fetching the endpoint file
    #[arg(long, env = "POOL_MINER_RESOLVE_TIMEOUT", default_value = "10s", value_parser = parse_duration_arg)]
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout: String,

    /// Log level (RUST_LOG overrides)
    #[arg(short = 'l', long, value_enum, env = "POOL_MINER_LOG_LEVEL", default_value_t = LogLevel::Info)]
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, env = "POOL_MINER_LOG_FORMAT", default_value_t = LogFormat::Text)]
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Config {
    /// Parse the process arguments and merge the config file, if any
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches).await
    }

    /// Build a validated configuration from parsed arguments
    pub async fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config = Self::from_arg_matches(matches)
            .map_err(|e| Error::config(format!("Invalid arguments: {}", e)))?;

        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config = config.merge_with_file(file_config, matches);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Take file values for everything not given on the command line or
    /// in the environment
    fn merge_with_file(mut self, file: Self, matches: &ArgMatches) -> Self {
        let explicit = |id: &str| {
            matches!(
                matches.value_source(id),
                Some(ValueSource::CommandLine | ValueSource::EnvVariable)
            )
        };

        macro_rules! take_from_file {
            ($($field:ident),* $(,)?) => {
                $(
                    if !explicit(stringify!($field)) {
                        self.$field = file.$field;
                    }
                )*
            };
        }

        take_from_file!(
            username,
            threads,
            endpoint_url,
            host,
            port,
            framing,
            work,
            constant_delay,
            monitor_interval,
            restart_delay,
            stagger,
            read_timeout,
            handshake_timeout,
            resolve_timeout,
            log_level,
            log_format,
        );
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(username) = &self.username {
            Username::new(username.clone())?;
        }

        if self.threads == Some(0) {
            return Err(Error::config("Thread count must be greater than 0"));
        }

        Url::parse(&self.endpoint_url)
            .map_err(|e| Error::config(format!("Invalid endpoint URL: {}", e)))?;

        match (&self.host, self.port) {
            (Some(host), Some(port)) => {
                if host.trim().is_empty() || port == 0 {
                    return Err(Error::config("Pool host and port must be non-empty"));
                }
            }
            (None, None) => {}
            _ => return Err(Error::config("--host and --port must be given together")),
        }

        self.constant_delay()?;
        self.monitor_interval()?;
        self.restart_delay()?;
        self.stagger()?;
        self.read_timeout()?;
        self.resolve_timeout()?;

        if self.monitor_interval()?.is_zero() {
            return Err(Error::config("Monitor interval must be greater than 0"));
        }
        if self.handshake_timeout()?.is_zero() {
            return Err(Error::config("Handshake timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Validated username, if one was configured
    pub fn username(&self) -> Result<Option<Username>> {
        self.username.clone().map(Username::new).transpose()
    }

    /// Fixed endpoint when `--host` and `--port` are set
    pub fn static_endpoint(&self) -> Option<ServerEndpoint> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some(ServerEndpoint::new(host.trim(), port)),
            _ => None,
        }
    }

    /// Get constant delay duration
    pub fn constant_delay(&self) -> Result<Duration> {
        duration_field("constant-delay", &self.constant_delay)
    }

    /// Get monitor interval duration
    pub fn monitor_interval(&self) -> Result<Duration> {
        duration_field("monitor-interval", &self.monitor_interval)
    }

    /// Get restart delay duration
    pub fn restart_delay(&self) -> Result<Duration> {
        duration_field("restart-delay", &self.restart_delay)
    }

    /// Get stagger duration
    pub fn stagger(&self) -> Result<Duration> {
        duration_field("stagger", &self.stagger)
    }

    /// Get read timeout duration
    pub fn read_timeout(&self) -> Result<Option<Duration>> {
        self.read_timeout
            .as_deref()
            .map(|value| duration_field("read-timeout", value))
            .transpose()
    }

    /// Get handshake timeout duration
    pub fn handshake_timeout(&self) -> Result<Duration> {
        duration_field("handshake-timeout", &self.handshake_timeout)
    }

    /// Get resolve timeout duration
    pub fn resolve_timeout(&self) -> Result<Duration> {
        duration_field("resolve-timeout", &self.resolve_timeout)
    }

    /// Pool settings for `sessions` parallel sessions
    pub fn pool_settings(&self, sessions: usize) -> Result<PoolSettings> {
        if sessions == 0 {
            return Err(Error::config("Thread count must be greater than 0"));
        }

        Ok(PoolSettings {
            sessions,
            framing: self.framing,
            read_timeout: self.read_timeout()?,
            handshake_timeout: self.handshake_timeout()?,
            monitor_interval: self.monitor_interval()?,
            restart_delay: self.restart_delay()?,
            stagger: self.stagger()?,
        })
    }
}

fn duration_field(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| Error::config(format!("Invalid {}: {}", name, e)))
}

/// clap value parser keeping the original text while rejecting bad input
fn parse_duration_arg(value: &str) -> std::result::Result<String, String> {
    parse_duration(value).map(|_| value.trim().to_string())
}

// Default value functions for serde
fn default_endpoint_url() -> String { DEFAULT_ENDPOINT_URL.to_string() }
fn default_constant_delay() -> String { "100ms".to_string() }
fn default_monitor_interval() -> String { "1s".to_string() }
fn default_restart_delay() -> String { "5s".to_string() }
fn default_stagger() -> String { "1s".to_string() }
fn default_handshake_timeout() -> String { "2s".to_string() }
fn default_resolve_timeout() -> String { "10s".to_string() }
