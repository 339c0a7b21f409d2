//! Configuration management for livetv-exporter.
//!
//! This module handles loading, merging, and validating configuration from files,
//! environment and CLI arguments. It supports YAML, JSON, and TOML formats.
//! Precedence: CLI > environment > config file > default.

use crate::api::client::{ClientOptions, RetryPolicy};
use crate::api::Resource;
use crate::cli::{Args, ConfigFormat, LogLevel};
use crate::error::ConfigError;
use crate::fetch::CacheTtls;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9119;
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8096";
pub const DEFAULT_SCRAPE_INTERVAL: u64 = 30;
pub const DEFAULT_CACHE_TTL: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_STALE_AFTER_INTERVALS: u32 = 3;

/// Slack added on top of the worst-case request budget for the default cycle timeout.
const CYCLE_TIMEOUT_SLACK_SECS: u64 = 5;

const REDACTED: &str = "********";

/// Exporter configuration; every field is optional so files can be partial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Upstream
    #[serde(alias = "server-url")]
    pub server_url: Option<String>,
    #[serde(alias = "api-key")]
    pub api_key: Option<String>,
    #[serde(alias = "request-timeout")]
    pub request_timeout: Option<u64>,
    #[serde(alias = "max-retries")]
    pub max_retries: Option<u32>,

    // Refresh
    #[serde(alias = "scrape-interval")]
    pub scrape_interval: Option<u64>,
    #[serde(alias = "cycle-timeout")]
    pub cycle_timeout: Option<u64>,
    #[serde(alias = "stale-after-intervals")]
    pub stale_after_intervals: Option<u32>,

    // Caching
    pub cache_ttl: Option<u64>,

    // Feature flags
    #[serde(alias = "enable-guide")]
    pub enable_guide: Option<bool>,
    pub enable_health: Option<bool>,

    // Logging
    pub log_level: Option<String>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,

    // Kept last: TOML emits tables after plain values.
    /// Per-resource TTL overrides in seconds, keyed by resource name.
    #[serde(alias = "cache-ttls")]
    pub cache_ttls: Option<BTreeMap<String, u64>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            server_url: Some(DEFAULT_SERVER_URL.to_string()),
            api_key: None,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            max_retries: Some(DEFAULT_MAX_RETRIES),
            scrape_interval: Some(DEFAULT_SCRAPE_INTERVAL),
            cycle_timeout: None,
            stale_after_intervals: Some(DEFAULT_STALE_AFTER_INTERVALS),
            cache_ttl: Some(DEFAULT_CACHE_TTL),
            cache_ttls: None,
            enable_guide: Some(true),
            enable_health: Some(true),
            log_level: Some("info".into()),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn server_url(&self) -> &str {
        self.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval.unwrap_or(DEFAULT_SCRAPE_INTERVAL))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            ..RetryPolicy::default()
        }
    }

    /// Worst case for one resource: every attempt times out and every backoff is maximal.
    /// `None` when it does not fit in a `Duration`.
    pub fn checked_request_budget(&self) -> Option<Duration> {
        let policy = self.retry_policy();
        self.request_timeout()
            .checked_mul(policy.max_retries.checked_add(1)?)?
            .checked_add(policy.total_backoff())
    }

    pub fn request_budget(&self) -> Duration {
        self.checked_request_budget().unwrap_or(Duration::MAX)
    }

    pub fn cycle_timeout(&self) -> Duration {
        match self.cycle_timeout {
            Some(secs) => Duration::from_secs(secs),
            None => self
                .request_budget()
                .saturating_add(Duration::from_secs(CYCLE_TIMEOUT_SLACK_SECS)),
        }
    }

    pub fn checked_stale_after(&self) -> Option<Duration> {
        self.scrape_interval().checked_mul(
            self.stale_after_intervals
                .unwrap_or(DEFAULT_STALE_AFTER_INTERVALS),
        )
    }

    /// Age after which the published snapshot counts as stale.
    pub fn stale_after(&self) -> Duration {
        self.checked_stale_after().unwrap_or(Duration::MAX)
    }

    pub fn guide_enabled(&self) -> bool {
        self.enable_guide.unwrap_or(true)
    }

    pub fn health_enabled(&self) -> bool {
        self.enable_health.unwrap_or(true)
    }

    pub fn tls_enabled(&self) -> bool {
        self.enable_tls.unwrap_or(false)
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
            .as_deref()
            .and_then(LogLevel::from_name)
            .unwrap_or(LogLevel::Info)
    }

    pub fn cache_ttls(&self) -> Result<CacheTtls, ConfigError> {
        let base = Duration::from_secs(self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL));
        let mut ttls = CacheTtls::from_base(base);
        for (name, secs) in self.cache_ttls.iter().flatten() {
            let resource = Resource::from_name(name).ok_or_else(|| {
                ConfigError::invalid("cache_ttls", format!("unknown resource '{}'", name))
            })?;
            ttls.set(resource, Duration::from_secs(*secs));
        }
        Ok(ttls)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.server_url().to_string(),
            api_key: self.api_key.clone().unwrap_or_default(),
            request_timeout: self.request_timeout(),
            retry: self.retry_policy(),
        }
    }

    /// Copy safe to print or serve: the API key is masked.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if copy.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            copy.api_key = Some(REDACTED.to_string());
        }
        copy
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    // Upstream URL
    let url = reqwest::Url::parse(cfg.server_url()).map_err(|e| {
        ConfigError::invalid("server_url", format!("'{}' is not a valid URL: {}", cfg.server_url(), e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "server_url",
            format!("scheme must be http or https, got '{}'", url.scheme()),
        )
        .into());
    }

    if cfg.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        return Err(ConfigError::invalid(
            "api_key",
            "an API key is required (set EMBY_API_KEY or api_key)",
        )
        .into());
    }

    if cfg.scrape_interval.unwrap_or(DEFAULT_SCRAPE_INTERVAL) == 0 {
        return Err(ConfigError::invalid("scrape_interval", "must be greater than 0").into());
    }
    if cfg.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT) == 0 {
        return Err(ConfigError::invalid("request_timeout", "must be greater than 0").into());
    }
    if cfg.stale_after_intervals == Some(0) {
        return Err(ConfigError::invalid("stale_after_intervals", "must be greater than 0").into());
    }
    if cfg.checked_stale_after().is_none() {
        return Err(ConfigError::invalid(
            "stale_after_intervals",
            "scrape_interval x stale_after_intervals is out of range",
        )
        .into());
    }

    cfg.cache_ttls()?;

    // Every upstream call must be able to finish inside one cycle.
    let budget = cfg.checked_request_budget().ok_or_else(|| {
        ConfigError::invalid(
            "max_retries",
            "worst-case request time is out of range; lower max_retries or request_timeout",
        )
    })?;
    if cfg.cycle_timeout() <= budget {
        return Err(ConfigError::invalid(
            "cycle_timeout",
            format!(
                "{}s does not exceed the worst-case request time of {}s \
                 ((max_retries + 1) x request_timeout + backoff)",
                cfg.cycle_timeout().as_secs(),
                budget.as_secs()
            ),
        )
        .into());
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if LogLevel::from_name(level).is_none() {
            return Err(ConfigError::invalid("log_level", format!("unknown level '{}'", level)).into());
        }
    }

    // TLS validation
    if cfg.tls_enabled() {
        let cert_path = cfg.tls_cert_path.as_deref();
        let key_path = cfg.tls_key_path.as_deref();

        match (cert_path, key_path) {
            (None, None) => {
                return Err(
                    "TLS is enabled but neither tls_cert_path nor tls_key_path are set".into(),
                );
            }
            (Some(_), None) => {
                return Err("TLS is enabled but tls_key_path is not set".into());
            }
            (None, Some(_)) => {
                return Err("TLS is enabled but tls_cert_path is not set".into());
            }
            (Some(cert), Some(key)) => {
                check_tls_file(cert, "certificate")?;
                check_tls_file(key, "private key")?;
            }
        }
    }

    Ok(())
}

fn check_tls_file(path: &str, what: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        return Err(format!("TLS {} file not found: {}", what, path).into());
    }
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Err(format!("TLS {} file is empty: {}", what, path).into()),
        Err(e) => Err(format!("TLS {} file is not readable: {} ({})", what, path, e).into()),
        Ok(_) => Ok(()),
    }
}

/// Resolves configuration from CLI args, environment, config file, and defaults.
///
/// clap already folds the environment into `args`, so anything set there wins
/// over the file.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref().and_then(|p| p.to_str()))?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(url) = &args.server_url {
        config.server_url = Some(url.clone());
    }
    if let Some(key) = &args.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(interval) = args.scrape_interval {
        config.scrape_interval = Some(interval);
    }
    if let Some(cache_ttl) = args.cache_ttl {
        config.cache_ttl = Some(cache_ttl);
    }
    if let Some(timeout) = args.request_timeout {
        config.request_timeout = Some(timeout);
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = Some(retries);
    }
    if let Some(timeout) = args.cycle_timeout {
        config.cycle_timeout = Some(timeout);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(format!("{level:?}").to_lowercase());
    }

    // Feature flags
    if args.disable_guide {
        config.enable_guide = Some(false);
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

/// Loads a config file; an explicit path must exist, default locations are optional.
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => {
            let path = PathBuf::from(p);
            if !path.exists() {
                return Err(format!("Config file not found: {}", path.display()).into());
            }
            path
        }
        None => {
            let defaults = [
                "/etc/livetv-exporter/config.yaml",
                "/etc/livetv-exporter/config.yml",
                "/etc/livetv-exporter/config.json",
                "./livetv-exporter.yaml",
                "./livetv-exporter.yml",
                "./livetv-exporter.json",
            ];
            match defaults.iter().find(|p| Path::new(p).exists()) {
                Some(found) => PathBuf::from(found),
                None => return Ok(Config::default()),
            }
        }
    };

    let content = fs::read_to_string(&path)?;

    // Partial files fall back to defaults for anything they leave out.
    let parsed: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        Some("toml") => toml::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    info!("Loaded configuration from: {}", path.display());
    Ok(merge_over_defaults(parsed))
}

fn merge_over_defaults(file: Config) -> Config {
    let d = Config::default();
    Config {
        port: file.port.or(d.port),
        bind: file.bind.or(d.bind),
        server_url: file.server_url.or(d.server_url),
        api_key: file.api_key.or(d.api_key),
        request_timeout: file.request_timeout.or(d.request_timeout),
        max_retries: file.max_retries.or(d.max_retries),
        scrape_interval: file.scrape_interval.or(d.scrape_interval),
        cycle_timeout: file.cycle_timeout.or(d.cycle_timeout),
        stale_after_intervals: file.stale_after_intervals.or(d.stale_after_intervals),
        cache_ttl: file.cache_ttl.or(d.cache_ttl),
        cache_ttls: file.cache_ttls.or(d.cache_ttls),
        enable_guide: file.enable_guide.or(d.enable_guide),
        enable_health: file.enable_health.or(d.enable_health),
        log_level: file.log_level.or(d.log_level),
        enable_tls: file.enable_tls.or(d.enable_tls),
        tls_cert_path: file.tls_cert_path.or(d.tls_cert_path),
        tls_key_path: file.tls_key_path.or(d.tls_key_path),
    }
}

/// Renders configuration in the requested format
pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Shows configuration in requested format, API key redacted
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render_config(&config.redacted(), format)?);
    Ok(())
}
