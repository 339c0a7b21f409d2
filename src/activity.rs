//! Per-user watch time and channel switches.
//!
//! Derived by comparing the Live TV sessions of the current cycle with those
//! of the preceding one. Watch time only accrues for sessions seen in both
//! cycles; a channel switch is counted when a user is watching a channel now
//! that they were not watching in the previous cycle while also having left
//! one they were watching.

use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::model::Session;
use crate::snapshot::UserActivity;

/// Longest gap between two observations that still counts as continuous watching.
pub const DEFAULT_MAX_WATCH_GAP_SECS: i64 = 300;

#[derive(Debug, Default, Clone)]
struct UserView {
    session_ids: AHashSet<String>,
    channels: AHashSet<String>,
    streams: u64,
}

fn group_by_user(sessions: &[Session]) -> AHashMap<String, UserView> {
    let mut views: AHashMap<String, UserView> = AHashMap::new();
    for session in sessions {
        let view = views.entry(session.user.clone()).or_default();
        view.session_ids.insert(session.id.clone());
        view.channels.insert(session.now_playing.channel_name.clone());
        view.streams += 1;
    }
    views
}

#[derive(Debug, Clone)]
pub struct UserActivityTracker {
    totals: BTreeMap<String, UserActivity>,
    previous: AHashMap<String, UserView>,
    last_seen_at: Option<DateTime<Utc>>,
    max_gap: Duration,
}

impl Default for UserActivityTracker {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_MAX_WATCH_GAP_SECS))
    }
}

impl UserActivityTracker {
    pub fn new(max_gap: Duration) -> Self {
        Self {
            totals: BTreeMap::new(),
            previous: AHashMap::new(),
            last_seen_at: None,
            max_gap,
        }
    }

    /// Folds one cycle's session list into the per-user records.
    pub fn observe(&mut self, sessions: &[Session], now: DateTime<Utc>) {
        let current = group_by_user(sessions);
        let elapsed = match self.last_seen_at {
            Some(prev) if now > prev => (now - prev).min(self.max_gap),
            _ => Duration::zero(),
        };
        let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;

        for (user, view) in &current {
            let record = self.totals.entry(user.clone()).or_default();
            record.concurrent_streams = view.streams;

            let Some(prev) = self.previous.get(user) else {
                continue;
            };
            let continued = view.session_ids.intersection(&prev.session_ids).count();
            record.watch_seconds_total += continued as f64 * elapsed_secs;

            let entered = view.channels.difference(&prev.channels).count();
            let left = prev.channels.difference(&view.channels).count();
            record.channel_switches_total += entered.min(left) as u64;
        }

        for (user, record) in self.totals.iter_mut() {
            if !current.contains_key(user) {
                record.concurrent_streams = 0;
            }
        }

        self.previous = current;
        self.last_seen_at = Some(now);
    }

    pub fn users(&self) -> &BTreeMap<String, UserActivity> {
        &self.totals
    }

    pub fn total_switches(&self) -> u64 {
        self.totals.values().map(|r| r.channel_switches_total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NowPlaying, PlayMethod};
    use chrono::TimeZone;

    fn session(id: &str, user: &str, channel: &str) -> Session {
        Session {
            id: id.to_string(),
            user: user.to_string(),
            client: "Emby Web".to_string(),
            device: "Chrome".to_string(),
            now_playing: NowPlaying {
                channel_id: format!("ch-{channel}"),
                channel_name: channel.to_string(),
                channel_number: "1".to_string(),
            },
            play_method: PlayMethod::DirectPlay,
            bitrate_kbps: 4000.0,
            height: Some(1080),
            framerate: Some(25.0),
            position_seconds: 0.0,
            paused: false,
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_channel_change_counts_one_switch() {
        let mut tracker = UserActivityTracker::default();
        tracker.observe(&[session("s1", "alice", "CNN")], t(0));
        tracker.observe(&[session("s1", "alice", "ESPN")], t(30));

        let alice = &tracker.users()["alice"];
        assert_eq!(alice.channel_switches_total, 1);
        assert_eq!(tracker.total_switches(), 1);
    }

    #[test]
    fn test_same_channel_is_not_a_switch() {
        let mut tracker = UserActivityTracker::default();
        for i in 0..4 {
            tracker.observe(&[session("s1", "bob", "BBC One")], t(i * 30));
        }
        assert_eq!(tracker.users()["bob"].channel_switches_total, 0);
    }

    #[test]
    fn test_opening_extra_stream_is_not_a_switch() {
        let mut tracker = UserActivityTracker::default();
        tracker.observe(&[session("s1", "carol", "CNN")], t(0));
        tracker.observe(
            &[session("s1", "carol", "CNN"), session("s2", "carol", "ESPN")],
            t(30),
        );
        let carol = &tracker.users()["carol"];
        assert_eq!(carol.channel_switches_total, 0);
        assert_eq!(carol.concurrent_streams, 2);
    }

    #[test]
    fn test_watch_time_accrues_for_continuing_sessions() {
        let mut tracker = UserActivityTracker::default();
        tracker.observe(&[session("s1", "dave", "CNN")], t(0));
        tracker.observe(&[session("s1", "dave", "CNN")], t(30));
        tracker.observe(&[session("s1", "dave", "CNN")], t(60));
        assert_eq!(tracker.users()["dave"].watch_seconds_total, 60.0);
    }

    #[test]
    fn test_watch_time_gap_is_capped() {
        let mut tracker = UserActivityTracker::default();
        tracker.observe(&[session("s1", "erin", "CNN")], t(0));
        tracker.observe(&[session("s1", "erin", "CNN")], t(3600));
        assert_eq!(
            tracker.users()["erin"].watch_seconds_total,
            DEFAULT_MAX_WATCH_GAP_SECS as f64
        );
    }

    #[test]
    fn test_departed_user_keeps_totals_with_zero_streams() {
        let mut tracker = UserActivityTracker::default();
        tracker.observe(&[session("s1", "frank", "CNN")], t(0));
        tracker.observe(&[session("s1", "frank", "CNN")], t(30));
        tracker.observe(&[], t(60));

        let frank = &tracker.users()["frank"];
        assert_eq!(frank.concurrent_streams, 0);
        assert_eq!(frank.watch_seconds_total, 30.0);
    }

    #[test]
    fn test_new_session_id_does_not_accrue_time() {
        let mut tracker = UserActivityTracker::default();
        tracker.observe(&[session("s1", "gina", "CNN")], t(0));
        tracker.observe(&[session("s2", "gina", "CNN")], t(30));
        assert_eq!(tracker.users()["gina"].watch_seconds_total, 0.0);
    }
}
