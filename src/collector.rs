//! One refresh cycle: fetch, aggregate, hand back a snapshot.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregation;
use crate::api::MediaServer;
use crate::error::ApiError;
use crate::fetch::{CacheTtls, Fetcher};
use crate::metrics::ExporterTelemetry;
use crate::snapshot::Snapshot;
use crate::store::StateStore;

/// Owns the fetcher and the cross-cycle state. Driven by the scheduler or directly by tests.
pub struct Collector<S: MediaServer> {
    fetcher: Fetcher<S>,
    store: StateStore,
    guide_enabled: bool,
    /// Set while the server rejects our token, so the failure is logged once.
    auth_failing: bool,
}

impl<S: MediaServer> Collector<S> {
    pub fn new(
        server: Arc<S>,
        ttls: CacheTtls,
        telemetry: &ExporterTelemetry,
        guide_enabled: bool,
    ) -> Self {
        Self {
            fetcher: Fetcher::new(server, ttls, telemetry),
            store: StateStore::new(),
            guide_enabled,
            auth_failing: false,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Runs one cycle against the previously published snapshot.
    ///
    /// All awaits happen before the state store is touched, so dropping this
    /// future (cycle timeout) leaves the store as it was.
    #[instrument(skip_all)]
    pub async fn run_cycle(&mut self, previous: Option<&Snapshot>) -> Snapshot {
        let started = Instant::now();
        let now = Utc::now();

        let input = self.fetcher.fetch_all(now, self.guide_enabled).await;

        let errors = input.errors();
        self.track_auth(errors.iter().map(|(_, e)| *e).find(|e| e.is_auth()));
        for (resource, e) in &errors {
            if !e.is_auth() {
                warn!("Fetching {} failed: {}", resource, e);
            }
        }
        if input.unreachable {
            warn!("Emby did not answer any request this cycle");
        }

        let mut snapshot = aggregation::aggregate(&input, &mut self.store, previous, now);
        snapshot.cycle_duration_seconds = started.elapsed().as_secs_f64();

        let stale: Vec<&str> = snapshot.stale_groups().collect();
        if !stale.is_empty() {
            warn!("Serving stale metric groups: {}", stale.join(", "));
        }
        if let Some(streams) = &snapshot.streams.data {
            info!(
                "Cycle complete in {:.2}s: up={}, {} streams, {} users, {:.2} Mbps",
                snapshot.cycle_duration_seconds,
                snapshot.up,
                streams.streams_active,
                streams.users_watching,
                streams.bandwidth_total_mbps
            );
        } else {
            info!(
                "Cycle complete in {:.2}s: up={}, no session data",
                snapshot.cycle_duration_seconds, snapshot.up
            );
        }
        snapshot
    }

    fn track_auth(&mut self, auth_error: Option<&ApiError>) {
        match (auth_error, self.auth_failing) {
            (Some(e), false) => {
                error!("Emby rejected the API key, check EMBY_API_KEY: {}", e);
                self.auth_failing = true;
            }
            (Some(e), true) => debug!("Authentication still failing: {}", e),
            (None, true) => {
                info!("Authentication with Emby recovered");
                self.auth_failing = false;
            }
            (None, false) => {}
        }
    }
}
