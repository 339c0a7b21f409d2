//! Application state shared by the HTTP handlers.
//!
//! Handlers only read: the published snapshot lives in the [`MetricsRegistry`]
//! and is swapped in by the scheduler.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::metrics::ExporterTelemetry;
use crate::registry::MetricsRegistry;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub registry: Arc<MetricsRegistry>,
    pub telemetry: Arc<ExporterTelemetry>,
    pub config: Arc<Config>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<MetricsRegistry>,
        telemetry: Arc<ExporterTelemetry>,
        config: Config,
    ) -> SharedState {
        Arc::new(Self {
            registry,
            telemetry,
            config: Arc::new(config),
            start_time: Instant::now(),
        })
    }

    pub fn uptime_string(&self) -> String {
        let secs = self.start_time.elapsed().as_secs();
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
