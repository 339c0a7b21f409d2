//! CLI arguments and subcommands for livetv-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands. Connection settings can also
//! be supplied through the environment.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parses the `log_level` config key.
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "livetv-exporter",
    about = "Prometheus exporter for Emby Live TV analytics",
    long_about = "Prometheus exporter for Emby Live TV analytics.\n\n\
                  Polls the Emby REST API on a fixed interval and publishes stream, channel, \
                  tuner, recording and guide metrics together with derived analytics such as \
                  channel popularity, peak concurrency and hourly activity.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long, env = "EXPORTER_PORT")]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides the config file, default: info)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Emby server base URL
    #[arg(long, env = "EMBY_SERVER_URL")]
    pub server_url: Option<String>,

    /// Emby API key
    #[arg(long, env = "EMBY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Refresh interval in seconds
    #[arg(long, env = "SCRAPE_INTERVAL")]
    pub scrape_interval: Option<u64>,

    /// Cache API responses for N seconds
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Retries for transient upstream failures
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Hard timeout for one refresh cycle in seconds
    #[arg(long)]
    pub cycle_timeout: Option<u64>,

    /// Disable guide (EPG) collection
    #[arg(long)]
    pub disable_guide: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check connectivity and credentials against the Emby server
    Check {
        /// Only verify the API key (server info endpoint)
        #[arg(long)]
        auth_only: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Run collection cycles and print the resulting metrics
    Test {
        /// Number of cycles to run
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: usize,

        /// Print the exposition after every cycle
        #[arg(long)]
        verbose: bool,
    },
}
