//! Health check endpoint handler.
//!
//! Reports the registry state and the age of the published snapshot as a
//! plain-text table.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::registry::RegistryState;
use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = "livetv-exporter: Prometheus metrics for Emby Live TV";

/// Maps registry state and staleness to an HTTP status.
///
/// Empty has nothing to serve, and a stale snapshot means cycles stopped
/// publishing. Degraded is tolerated while the snapshot is recent.
pub fn health_status(state: RegistryState, stale: bool) -> StatusCode {
    match state {
        RegistryState::Empty => StatusCode::SERVICE_UNAVAILABLE,
        _ if stale => StatusCode::SERVICE_UNAVAILABLE,
        RegistryState::Degraded | RegistryState::Ready => StatusCode::OK,
    }
}

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let published = state.registry.load();
    let stale = state.registry.is_stale();
    let status = health_status(published.state, stale);

    let message = match (published.state, stale) {
        (RegistryState::Empty, _) => "Waiting for first refresh cycle",
        (RegistryState::Ready, false) => "OK",
        (RegistryState::Ready, true) => "Stale - No cycle published recently",
        (RegistryState::Degraded, false) => "Degraded - Serving stale metric groups",
        (RegistryState::Degraded, true) => "Degraded - Snapshot stale",
    };

    let mut out = String::new();
    writeln!(out, "{message}").ok();
    writeln!(out).ok();
    writeln!(out, "{:28} {}", "State:", published.state.as_str()).ok();
    writeln!(out, "{:28} {}", "Uptime:", state.uptime_string()).ok();
    match state.registry.age() {
        Some(age) => writeln!(out, "{:28} {:.1}s", "Snapshot age:", age.as_secs_f64()).ok(),
        None => writeln!(out, "{:28} none", "Snapshot age:").ok(),
    };
    writeln!(
        out,
        "{:28} {}s",
        "Stale after:",
        state.registry.stale_after().as_secs()
    )
    .ok();

    if let Some(snapshot) = &published.snapshot {
        writeln!(out, "{:28} {}", "Emby up:", snapshot.up).ok();
        writeln!(out).ok();
        writeln!(out, "{:12} | {:>6}", "Group", "Stale").ok();
        writeln!(out, "{}", "-".repeat(21)).ok();
        for (group, stale) in snapshot.group_freshness() {
            writeln!(out, "{:12} | {:>6}", group, if stale { "yes" } else { "no" }).ok();
        }
    }

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{out}\n{FOOTER_TEXT}\n"),
    )
}
