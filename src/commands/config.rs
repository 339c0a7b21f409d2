//! Config command implementation.
//!
//! Generates configuration files in various formats.

use anyhow::Context;
use std::fs;
use std::path::PathBuf;

use livetv_exporter::cli::ConfigFormat;
use livetv_exporter::config::{render_config, Config};

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from(match format {
            ConfigFormat::Yaml => "livetv-exporter.yaml",
            ConfigFormat::Json => "livetv-exporter.json",
            ConfigFormat::Toml => "livetv-exporter.toml",
        }),
    };

    let mut content = render_config(&config, format)
        .map_err(|e| anyhow::anyhow!("rendering default config: {}", e))?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)
            .with_context(|| format!("writing {}", output.display()))?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Emby Live TV Exporter Configuration
# ===================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9119                   # HTTP port (env: EXPORTER_PORT)
#
# Emby Connection
# ---------------
# server_url: "http://localhost:8096"  # Emby base URL (env: EMBY_SERVER_URL)
# api_key: null                # Emby API key, required (env: EMBY_API_KEY)
# request_timeout: 10          # Per-request timeout in seconds
# max_retries: 2               # Retries for timeouts, connection errors and 5xx
#
# Refresh Cycle
# -------------
# scrape_interval: 30          # Seconds between refresh cycles (env: SCRAPE_INTERVAL)
# cycle_timeout: null          # Hard cycle timeout (null = worst-case request time + 5s)
# stale_after_intervals: 3     # Snapshot reported stale after N missed intervals
#
# Caching
# -------
# cache_ttl: 60                # Base TTL for cached API responses in seconds
# cache_ttls:                  # Per-resource overrides
#   sessions: 10               # server_info, sessions, channels, tuners,
#   guide: 300                 # timers, recordings, guide
#
# Feature Flags
# -------------
# enable_guide: true           # Collect EPG / guide metrics
# enable_health: true          # Enable /health endpoint
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
#
# TLS/SSL Configuration
# ---------------------
# enable_tls: false            # Enable HTTPS (default: false)
# tls_cert_path: null          # Path to TLS certificate (PEM format)
# tls_key_path: null           # Path to TLS private key (PEM format)
"#;

    format!("{comments}\n{yaml}")
}
