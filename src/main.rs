//! livetv-exporter
//!
//! Prometheus exporter for Emby Live TV. This is the main entry point that
//! wires the refresh scheduler to the HTTP server and handles subcommands.

mod commands;

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

use commands::{command_check, command_config, command_test};
use livetv_exporter::api::EmbyClient;
use livetv_exporter::cli::{Args, Commands, LogLevel};
use livetv_exporter::collector::Collector;
use livetv_exporter::config::{resolve_config, show_config, validate_effective_config, Config};
use livetv_exporter::handlers;
use livetv_exporter::metrics::ExporterTelemetry;
use livetv_exporter::registry::MetricsRegistry;
use livetv_exporter::scheduler::Scheduler;
use livetv_exporter::state::AppState;

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(config: &Config) {
    let level = config.log_level();
    let filter = match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Config {
                output,
                format,
                commented,
            } => Ok(command_config(output.clone(), *format, *commented)?),

            // Reports validation problems itself instead of exiting early.
            Commands::Check { auth_only } => {
                let config = resolve_config(&args)?;
                Ok(command_check(*auth_only, &config).await?)
            }

            Commands::Test {
                iterations,
                verbose,
            } => {
                let config = load_validated_config(&args)?;
                setup_logging(&config);
                Ok(command_test(*iterations, *verbose, &config).await?)
            }
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;
    setup_logging(&config);

    info!("Starting livetv-exporter for {}", config.server_url());

    let telemetry = Arc::new(ExporterTelemetry::new()?);
    let registry = Arc::new(MetricsRegistry::new(config.stale_after())?);
    let client = Arc::new(EmbyClient::new(
        config.client_options(),
        Arc::clone(&telemetry),
    )?);
    let collector = Collector::new(
        client,
        config.cache_ttls()?,
        &telemetry,
        config.guide_enabled(),
    );
    let scheduler = Arc::new(Scheduler::new(
        collector,
        Arc::clone(&registry),
        Arc::clone(&telemetry),
        config.scrape_interval(),
        config.cycle_timeout(),
    ));

    // The refresh loop stops when the HTTP server does.
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let refresh = tokio::spawn(scheduler.run(async move {
        let _ = stop_rx.changed().await;
    }));

    let addr: SocketAddr = format!("{}:{}", config.bind_addr(), config.port()).parse()?;
    let tls_paths = if config.tls_enabled() {
        // Presence is checked by validate_effective_config.
        match (&config.tls_cert_path, &config.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => return Err("TLS enabled without certificate and key paths".into()),
        }
    } else {
        None
    };

    let state = AppState::new(Arc::clone(&registry), Arc::clone(&telemetry), config);
    let app = handlers::router(state);

    if let Some((cert_path, key_path)) = tls_paths {
        info!("Loading TLS certificate from: {}", cert_path);
        info!("Loading TLS private key from: {}", key_path);

        let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
            .await
            .map_err(|e| {
                error!("Failed to load TLS configuration: {}", e);
                e
            })?;

        info!("livetv-exporter listening on https://{}", addr);

        let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
            }
        }
    } else {
        let listener = TcpListener::bind(addr).await?;
        info!("livetv-exporter listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                error!("Server error: {}", e);
                e
            })?;
    }

    let _ = stop_tx.send(true);
    if let Err(e) = refresh.await {
        error!("Refresh loop terminated abnormally: {}", e);
    }

    info!("livetv-exporter stopped gracefully");
    Ok(())
}
