//! Fixed-interval refresh loop.
//!
//! Each tick runs on its own task. A tick that finds the previous cycle still
//! running is skipped; each cycle is bounded by a hard timeout after which it
//! is dropped and the previously published snapshot stays in place.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::api::MediaServer;
use crate::collector::Collector;
use crate::error::CycleError;
use crate::metrics::ExporterTelemetry;
use crate::registry::{MetricsRegistry, RegistryState};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(RegistryState),
    TimedOut,
    Skipped,
    RenderFailed,
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Published(state) => state.as_str(),
            CycleOutcome::TimedOut => "timeout",
            CycleOutcome::Skipped => "skipped",
            CycleOutcome::RenderFailed => "render_failed",
        }
    }
}

pub struct Scheduler<S: MediaServer> {
    collector: Mutex<Collector<S>>,
    registry: Arc<MetricsRegistry>,
    telemetry: Arc<ExporterTelemetry>,
    interval: Duration,
    cycle_timeout: Duration,
}

impl<S: MediaServer> Scheduler<S> {
    pub fn new(
        collector: Collector<S>,
        registry: Arc<MetricsRegistry>,
        telemetry: Arc<ExporterTelemetry>,
        interval: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            collector: Mutex::new(collector),
            registry,
            telemetry,
            interval,
            cycle_timeout,
        }
    }

    /// Runs one cycle unless another is in progress.
    pub async fn tick(&self) -> CycleOutcome {
        let Ok(mut collector) = self.collector.try_lock() else {
            warn!("Previous refresh cycle still running, skipping tick");
            return self.count(CycleOutcome::Skipped);
        };

        let previous = self.registry.snapshot();
        let timer = self.telemetry.cycle_duration.start_timer();
        let result =
            tokio::time::timeout(self.cycle_timeout, collector.run_cycle(previous.as_deref()))
                .await;
        timer.observe_duration();

        let outcome = match result {
            Err(_) => {
                error!(
                    "{}; keeping the previous snapshot",
                    CycleError::Timeout(self.cycle_timeout)
                );
                CycleOutcome::TimedOut
            }
            Ok(snapshot) => match self.registry.publish(snapshot) {
                Ok(state) => CycleOutcome::Published(state),
                Err(e) => {
                    error!("{}", CycleError::Render(e));
                    CycleOutcome::RenderFailed
                }
            },
        };
        self.count(outcome)
    }

    fn count(&self, outcome: CycleOutcome) -> CycleOutcome {
        self.telemetry
            .cycles_total
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    /// Ticks every interval until `shutdown` resolves. The first cycle starts immediately.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Refresh loop started: interval {:?}, cycle timeout {:?}",
            self.interval, self.cycle_timeout
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Refresh loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.tick().await;
                    });
                }
            }
        }
    }
}
