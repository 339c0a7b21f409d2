//! Cross-cycle accumulators owned by the collector.

use chrono::{DateTime, Local, Utc};

use crate::activity::UserActivityTracker;
use crate::hourly::{HourOfDay, HourlyActivity};
use crate::model::Session;
use crate::peak::PeakTracker;
use crate::snapshot::HistoryMetrics;

#[derive(Debug, Clone, Default)]
pub struct StateStore {
    pub peak: PeakTracker,
    pub hourly: HourlyActivity,
    pub users: UserActivityTracker,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one successful session observation into every accumulator.
    ///
    /// `users_watching` is recorded in the bucket of the local hour of `now`.
    pub fn observe_sessions(&mut self, sessions: &[Session], users_watching: u64, now: DateTime<Utc>) {
        self.peak.record(now, sessions.len() as u64);
        let local = now.with_timezone(&Local);
        self.hourly
            .record(local.date_naive(), HourOfDay::of(&local), users_watching as f64);
        self.users.observe(sessions, now);
    }

    /// Reads the accumulators as they stand at `now`.
    pub fn history(&mut self, now: DateTime<Utc>) -> HistoryMetrics {
        HistoryMetrics {
            peak_concurrent_streams_24h: self.peak.current_peak_at(now),
            hourly_active_users: self.hourly.snapshot(),
            users: self.users.users().clone(),
            channel_switches_total: self.users.total_switches(),
        }
    }
}
