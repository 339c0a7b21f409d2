//! Immutable result of one refresh cycle.
//!
//! A [`Snapshot`] is built by the aggregation engine, handed to the
//! [`crate::registry::MetricsRegistry`] and never mutated afterwards.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::ServerInfo;

/// Quality tier names in descending order.
pub const QUALITY_TIERS: [&str; 5] = ["4K", "1080p", "720p", "480p", "other"];

/// A metric group together with its freshness.
///
/// `data` is `None` when the group has never been computed successfully.
/// `stale` is set when this cycle failed to refresh it and the values were
/// carried over from an earlier cycle.
#[derive(Debug, Clone)]
pub struct Group<T> {
    pub data: Option<T>,
    pub stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for Group<T> {
    fn default() -> Self {
        Self {
            data: None,
            stale: false,
            updated_at: None,
        }
    }
}

impl<T: Clone> Group<T> {
    pub fn fresh(data: T, now: DateTime<Utc>) -> Self {
        Self {
            data: Some(data),
            stale: false,
            updated_at: Some(now),
        }
    }

    /// Keeps the previous cycle's values, flagged stale.
    pub fn carried_over(previous: Option<&Group<T>>) -> Self {
        match previous {
            Some(prev) => Self {
                data: prev.data.clone(),
                stale: prev.data.is_some(),
                updated_at: prev.updated_at,
            },
            None => Self::default(),
        }
    }
}

/// Stream-level figures derived from the session list.
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
    pub streams_active: u64,
    pub users_watching: u64,
    pub bandwidth_total_mbps: f64,
    pub transcoding_active: u64,
    pub transcoding_ratio: f64,
    /// (channel name, channel number) -> streams
    pub streams_by_channel: BTreeMap<(String, String), u64>,
    /// Every tier in [`QUALITY_TIERS`] is present, zero or not.
    pub streams_by_quality: BTreeMap<String, u64>,
    pub streams_by_method: BTreeMap<String, u64>,
    pub concurrent_streams_per_user: BTreeMap<String, u64>,
    /// channel name -> popularity in [0, 100]
    pub channel_popularity: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub id: String,
    pub name: String,
    pub number: String,
    pub available: bool,
    pub tuner: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelMetrics {
    pub total: u64,
    pub available: u64,
    pub hd: u64,
    pub favorites: u64,
    pub by_type: BTreeMap<String, u64>,
    pub statuses: Vec<ChannelStatus>,
}

#[derive(Debug, Clone)]
pub struct TunerState {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub in_use: bool,
    pub channel: String,
}

#[derive(Debug, Clone, Default)]
pub struct TunerMetrics {
    pub total: u64,
    pub in_use: u64,
    pub available: u64,
    pub errored: u64,
    pub utilization_percent: f64,
    pub tuners: Vec<TunerState>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    pub active: u64,
    pub scheduled: u64,
    pub series: u64,
    pub conflicts: u64,
    pub failed: u64,
    pub storage_used_gb: f64,
    pub scheduled_storage_estimate_gb: f64,
}

#[derive(Debug, Clone, Default)]
pub struct GuideMetrics {
    pub programs_today: u64,
    pub upcoming_next_hour: u64,
    pub average_duration_minutes: f64,
    pub programs_by_genre: BTreeMap<String, u64>,
    /// Consecutive days after today with guide data.
    pub days_available: u32,
}

/// Cumulative per-user activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserActivity {
    pub watch_seconds_total: f64,
    pub channel_switches_total: u64,
    pub concurrent_streams: u64,
}

/// Values read from the state store at the end of the cycle.
#[derive(Debug, Clone, Default)]
pub struct HistoryMetrics {
    pub peak_concurrent_streams_24h: u64,
    pub hourly_active_users: [f64; 24],
    pub users: BTreeMap<String, UserActivity>,
    pub channel_switches_total: u64,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Liveness: the server answered and the token was accepted this cycle.
    pub up: bool,
    pub server: Option<ServerInfo>,
    pub streams: Group<StreamMetrics>,
    pub channels: Group<ChannelMetrics>,
    pub tuners: Group<TunerMetrics>,
    pub recordings: Group<RecordingMetrics>,
    pub guide: Group<GuideMetrics>,
    pub history: Group<HistoryMetrics>,
    pub completed_at: DateTime<Utc>,
    pub cycle_duration_seconds: f64,
}

impl Snapshot {
    /// Whether any metric group failed to refresh in this cycle.
    pub fn is_degraded(&self) -> bool {
        !self.up || self.stale_groups().next().is_some()
    }

    /// Names of the groups carried over from an earlier cycle.
    pub fn stale_groups(&self) -> impl Iterator<Item = &'static str> + '_ {
        [
            ("streams", self.streams.stale),
            ("channels", self.channels.stale),
            ("tuners", self.tuners.stale),
            ("recordings", self.recordings.stale),
            ("guide", self.guide.stale),
            ("history", self.history.stale),
        ]
        .into_iter()
        .filter(|(_, stale)| *stale)
        .map(|(name, _)| name)
    }

    /// (group, stale) pairs for every group that has data.
    pub fn group_freshness(&self) -> Vec<(&'static str, bool)> {
        let mut out = Vec::new();
        if self.streams.data.is_some() {
            out.push(("streams", self.streams.stale));
        }
        if self.channels.data.is_some() {
            out.push(("channels", self.channels.stale));
        }
        if self.tuners.data.is_some() {
            out.push(("tuners", self.tuners.stale));
        }
        if self.recordings.data.is_some() {
            out.push(("recordings", self.recordings.stale));
        }
        if self.guide.data.is_some() {
            out.push(("guide", self.guide.stale));
        }
        if self.history.data.is_some() {
            out.push(("history", self.history.stale));
        }
        out
    }
}
