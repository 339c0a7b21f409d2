//! HTTP endpoint handlers for the exporter.
//!
//! - `/metrics`: Prometheus exposition of the published snapshot
//! - `/health`: Registry state and snapshot age
//! - `/config`: Effective configuration, API key redacted
//! - `/`: Landing page

pub mod config;
pub mod health;
pub mod metrics;
pub mod root;

use axum::{routing::get, Router};

use crate::state::SharedState;

pub use config::config_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use root::root_handler;

/// Builds the exporter router. `/health` is mounted only when enabled.
pub fn router(state: SharedState) -> Router {
    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler));

    if state.config.health_enabled() {
        app = app.route("/health", get(health_handler));
    }

    app.route("/config", get(config_handler)).with_state(state)
}
