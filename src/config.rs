//! Configuration management for the ticket miner
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON). Values given on the command line or
//! through the environment take precedence over the file; the file takes
//! precedence over built-in defaults.

use crate::ledger::{endpoint_url, BackoffConfig, Credentials};
use crate::{Error, Result};
use clap::parser::ValueSource;
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
    Pretty,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Complete configuration for the ticket miner
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "ticket-miner",
    version = env!("CARGO_PKG_VERSION"),
    about = "Mining session coordinator",
    long_about = "Runs proof-of-work search sessions that can be paused, persisted and resumed, and submits solved tickets to a ledger node over JSON-RPC"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Address the HTTP API listens on
    #[arg(long, default_value = "0.0.0.0:50051")]
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Ledger node host
    #[arg(long, default_value = "127.0.0.1")]
    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,

    /// Ledger node JSON-RPC port
    #[arg(long, default_value = "8332")]
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Ledger node RPC user
    #[arg(long, env = "TICKET_MINER_RPC_USER", default_value = "")]
    #[serde(default)]
    pub rpc_user: String,

    /// Ledger node RPC password
    #[arg(long, env = "TICKET_MINER_RPC_PASSWORD", default_value = "", hide_env_values = true)]
    #[serde(default)]
    pub rpc_password: String,

    /// Do not submit solved tickets to the ledger node
    #[arg(long = "no-broadcast", action = ArgAction::SetFalse)]
    #[serde(default = "default_true")]
    pub auto_broadcast: bool,

    /// Do not submit tickets solved by resumed sessions
    #[arg(long = "no-broadcast-on-resume", action = ArgAction::SetFalse)]
    #[serde(default = "default_true")]
    pub broadcast_on_resume: bool,

    /// JSON-RPC method used for ticket submission
    #[arg(long, default_value = "broadcastsupportticket")]
    #[serde(default = "default_ledger_method")]
    pub ledger_method: String,

    /// Directory for paused session state files
    #[arg(long, default_value = ".")]
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Nonces hashed by the CPU engine between control checks
    #[arg(long, default_value = "50000")]
    #[serde(default = "default_cpu_batch_size")]
    pub cpu_batch_size: u32,

    /// Ledger HTTP timeout in milliseconds
    #[arg(long, default_value = "30000")]
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,

    /// Maximum retry attempts for ledger requests
    #[arg(long, default_value = "3")]
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base retry delay in milliseconds
    #[arg(long, default_value = "100")]
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Maximum retry delay in milliseconds
    #[arg(long, default_value = "5000")]
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay: u64,

    /// How long finished sessions stay queryable (e.g. "1h", "30m")
    #[arg(long, default_value = "1h")]
    #[serde(default = "default_session_ttl")]
    pub session_ttl: String,

    /// How often finished sessions are swept
    #[arg(long, default_value = "1m")]
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval: String,

    /// How long shutdown waits for running searches
    #[arg(long, default_value = "5s")]
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Console log format
    #[arg(long, default_value = "text")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Also write daily-rolling log files to this directory
    #[arg(long, value_name = "DIR")]
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Copy each listed field from `file` unless it was set on the command line
/// or through the environment
macro_rules! merge_fields {
    ($config:ident, $file:ident, $matches:ident, [$($field:ident),* $(,)?]) => {
        $(
            if !explicitly_set($matches, stringify!($field)) {
                $config.$field = $file.$field;
            }
        )*
    };
}

fn explicitly_set(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable)
    )
}

impl Config {
    /// Load configuration from the process arguments and optional file
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(matches).await
    }

    /// Load configuration from explicit arguments
    pub async fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command()
            .try_get_matches_from(args)
            .map_err(|e| Error::config(e.to_string()))?;
        Self::from_matches(matches).await
    }

    async fn from_matches(matches: ArgMatches) -> Result<Self> {
        let mut config =
            Self::from_arg_matches(&matches).map_err(|e| Error::config(e.to_string()))?;

        // Load from config file if specified
        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config = config.merge_with_file(file_config, &matches);
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

    /// Merge file config into CLI config (CLI and env take precedence)
    fn merge_with_file(mut self, file: Self, matches: &ArgMatches) -> Self {
        merge_fields!(self, file, matches, [
            listen,
            rpc_host,
            rpc_port,
            rpc_user,
            rpc_password,
            auto_broadcast,
            broadcast_on_resume,
            ledger_method,
            state_dir,
            cpu_batch_size,
            http_timeout,
            max_retries,
            retry_delay,
            max_retry_delay,
            session_ttl,
            eviction_interval,
            shutdown_grace,
            log_level,
            log_format,
            log_dir,
        ]);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rpc_host.is_empty() {
            return Err(Error::config("RPC host must not be empty"));
        }
        Url::parse(&self.ledger_endpoint())
            .map_err(|e| Error::config(format!("Invalid ledger endpoint: {}", e)))?;

        if self.ledger_method.trim().is_empty() {
            return Err(Error::config("Ledger method must not be empty"));
        }
        if self.cpu_batch_size == 0 {
            return Err(Error::config("CPU batch size must be greater than 0"));
        }
        if self.http_timeout == 0 {
            return Err(Error::config("HTTP timeout must be greater than 0"));
        }

        self.session_ttl_duration()?;
        if self.eviction_interval_duration()?.is_zero() {
            return Err(Error::config("Eviction interval must be greater than 0"));
        }
        self.shutdown_grace_duration()?;

        Ok(())
    }

    /// Ledger node endpoint URL
    pub fn ledger_endpoint(&self) -> String {
        endpoint_url(&self.rpc_host, self.rpc_port)
    }

    /// Ledger credentials, present only when both user and password are set
    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::new(self.rpc_user.clone(), self.rpc_password.clone())
    }

    /// Get HTTP timeout duration
    pub fn http_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.http_timeout)
    }

    /// Retry policy for ledger requests
    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.retry_delay),
            max_delay: Duration::from_millis(self.max_retry_delay),
            multiplier: 2.0,
            max_retries: self.max_retries,
        }
    }

    /// Finished session lifetime
    pub fn session_ttl_duration(&self) -> Result<Duration> {
        parse_duration("session_ttl", &self.session_ttl)
    }

    /// Sweep period for finished sessions
    pub fn eviction_interval_duration(&self) -> Result<Duration> {
        parse_duration("eviction_interval", &self.eviction_interval)
    }

    /// Shutdown grace period
    pub fn shutdown_grace_duration(&self) -> Result<Duration> {
        parse_duration("shutdown_grace", &self.shutdown_grace)
    }

    /// Copy suitable for printing, with the RPC password masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.rpc_password.is_empty() {
            config.rpc_password = "***".to_string();
        }
        config
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::config(format!("Invalid {} '{}': {}", field, value, e)))
}

// Default value functions for serde
fn default_true() -> bool { true }
fn default_listen() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 50051)) }
fn default_rpc_host() -> String { "127.0.0.1".to_string() }
fn default_rpc_port() -> u16 { 8332 }
fn default_ledger_method() -> String { crate::ledger::DEFAULT_METHOD.to_string() }
fn default_state_dir() -> PathBuf { PathBuf::from(".") }
fn default_cpu_batch_size() -> u32 { 50_000 }
fn default_http_timeout() -> u64 { 30000 }
fn default_max_retries() -> usize { 3 }
fn default_retry_delay() -> u64 { 100 }
fn default_max_retry_delay() -> u64 { 5000 }
fn default_session_ttl() -> String { "1h".to_string() }
fn default_eviction_interval() -> String { "1m".to_string() }
fn default_shutdown_grace() -> String { "5s".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Text }
