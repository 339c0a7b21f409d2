//! Last published snapshot, shared between the scheduler and HTTP handlers.
//!
//! Publication is a single pointer swap of an immutable [`Published`] value.
//! A scrape loads one pointer and renders from it, so it never observes a mix
//! of two cycles.

use arc_swap::ArcSwap;
use prometheus::{Gauge, IntGauge, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::{self, ExporterTelemetry};
use crate::snapshot::Snapshot;

/// Lifecycle of the published metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// No cycle has completed yet.
    Empty,
    /// Last cycle refreshed every group and the server was reachable.
    Ready,
    /// Last cycle had failed groups or the server was down.
    Degraded,
}

impl RegistryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryState::Empty => "empty",
            RegistryState::Ready => "ready",
            RegistryState::Degraded => "degraded",
        }
    }
}

/// One immutable publication.
pub struct Published {
    pub snapshot: Option<Arc<Snapshot>>,
    /// Pre-rendered exposition of `snapshot`.
    pub rendered: String,
    pub published_at: Instant,
    pub state: RegistryState,
}

pub struct MetricsRegistry {
    current: ArcSwap<Published>,
    /// Age after which the published snapshot is reported stale.
    stale_after: Duration,
}

impl MetricsRegistry {
    pub fn new(stale_after: Duration) -> Result<Self, prometheus::Error> {
        let empty = Published {
            snapshot: None,
            rendered: metrics::render_empty()?,
            published_at: Instant::now(),
            state: RegistryState::Empty,
        };
        Ok(Self {
            current: ArcSwap::from_pointee(empty),
            stale_after,
        })
    }

    /// Renders and publishes a snapshot. On render failure the previous publication stays.
    pub fn publish(&self, snapshot: Snapshot) -> Result<RegistryState, prometheus::Error> {
        let rendered = metrics::render_snapshot(&snapshot)?;
        let state = if snapshot.is_degraded() {
            RegistryState::Degraded
        } else {
            RegistryState::Ready
        };
        self.current.store(Arc::new(Published {
            snapshot: Some(Arc::new(snapshot)),
            rendered,
            published_at: Instant::now(),
            state,
        }));
        debug!("Published snapshot, state={}", state.as_str());
        Ok(state)
    }

    pub fn load(&self) -> Arc<Published> {
        self.current.load_full()
    }

    pub fn state(&self) -> RegistryState {
        self.current.load().state
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.load().snapshot.clone()
    }

    /// Seconds since the last publication, `None` while empty.
    pub fn age(&self) -> Option<Duration> {
        let current = self.current.load();
        match current.state {
            RegistryState::Empty => None,
            _ => Some(current.published_at.elapsed()),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age().is_some_and(|age| age > self.stale_after)
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Full exposition for one scrape: snapshot metrics, freshness and self-telemetry.
    pub fn scrape(&self, telemetry: &ExporterTelemetry) -> Result<String, prometheus::Error> {
        let current = self.load();
        let mut out = current.rendered.clone();

        if current.state != RegistryState::Empty {
            let age = current.published_at.elapsed();
            let r = Registry::new();
            let age_gauge = Gauge::new(
                "emby_exporter_snapshot_age_seconds",
                "Seconds since the published snapshot was computed",
            )?;
            let stale_gauge = IntGauge::new(
                "emby_exporter_snapshot_stale",
                "Published snapshot is older than the staleness threshold (1=stale)",
            )?;
            r.register(Box::new(age_gauge.clone()))?;
            r.register(Box::new(stale_gauge.clone()))?;
            age_gauge.set(age.as_secs_f64());
            stale_gauge.set((age > self.stale_after) as i64);
            out.push_str(&metrics::encode(&r)?);
        }

        out.push_str(&telemetry.encode()?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Group, StreamMetrics};
    use chrono::Utc;

    fn snapshot(up: bool) -> Snapshot {
        let now = Utc::now();
        Snapshot {
            up,
            server: None,
            streams: Group::fresh(StreamMetrics::default(), now),
            channels: Group::default(),
            tuners: Group::default(),
            recordings: Group::default(),
            guide: Group::default(),
            history: Group::default(),
            completed_at: now,
            cycle_duration_seconds: 0.1,
        }
    }

    #[tokio::test]
    async fn test_empty_serves_only_up() {
        let registry = MetricsRegistry::new(Duration::from_secs(90)).unwrap();
        let telemetry = ExporterTelemetry::new().unwrap();
        assert_eq!(registry.state(), RegistryState::Empty);
        assert!(registry.age().is_none());

        let text = registry.scrape(&telemetry).unwrap();
        assert!(text.contains("emby_up 0"));
        assert!(!text.contains("emby_livetv_"));
        assert!(!text.contains("emby_exporter_snapshot_age_seconds"));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let registry = MetricsRegistry::new(Duration::from_secs(90)).unwrap();
        assert_eq!(registry.publish(snapshot(true)).unwrap(), RegistryState::Ready);
        assert_eq!(registry.publish(snapshot(false)).unwrap(), RegistryState::Degraded);
        assert_eq!(registry.publish(snapshot(true)).unwrap(), RegistryState::Ready);
        assert!(registry.snapshot().unwrap().up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_after_threshold() {
        let registry = MetricsRegistry::new(Duration::from_secs(90)).unwrap();
        let telemetry = ExporterTelemetry::new().unwrap();
        registry.publish(snapshot(true)).unwrap();
        assert!(!registry.is_stale());

        tokio::time::advance(Duration::from_secs(91)).await;
        assert!(registry.is_stale());
        let text = registry.scrape(&telemetry).unwrap();
        assert!(text.contains("emby_exporter_snapshot_stale 1"));
        assert!(text.contains("emby_livetv_streams_active 0"));
    }

    #[tokio::test]
    async fn test_reader_keeps_its_publication() {
        let registry = MetricsRegistry::new(Duration::from_secs(90)).unwrap();
        registry.publish(snapshot(true)).unwrap();
        let held = registry.load();
        registry.publish(snapshot(false)).unwrap();

        assert_eq!(held.state, RegistryState::Ready);
        assert!(held.rendered.contains("emby_up 1"));
        assert!(registry.load().rendered.contains("emby_up 0"));
    }
}
