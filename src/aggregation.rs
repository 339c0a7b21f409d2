//! Derived Live TV analytics.
//!
//! Pure functions from fetched resources to metric groups, plus [`aggregate`]
//! which assembles a full [`Snapshot`] and feeds the [`StateStore`]. A group
//! whose source resource failed this cycle is carried over from the previous
//! snapshot and flagged stale.

use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::fetch::{CycleInput, GuideWindow};
use crate::model::{Channel, Program, Recording, Session, Timer, TimerStatus, Tuner, TunerStatus};
use crate::snapshot::{
    ChannelMetrics, ChannelStatus, GuideMetrics, Group, RecordingMetrics, Snapshot, StreamMetrics,
    TunerMetrics, TunerState, QUALITY_TIERS,
};
use crate::store::StateStore;

/// Assumed bitrate of a scheduled recording, used for the storage estimate.
pub const ESTIMATED_RECORDING_KBPS: f64 = 8000.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Classifies a vertical resolution; bounds are inclusive.
pub fn quality_tier(height: Option<u32>) -> &'static str {
    match height {
        Some(h) if h >= 2160 => "4K",
        Some(h) if h >= 1080 => "1080p",
        Some(h) if h >= 720 => "720p",
        Some(h) if h >= 480 => "480p",
        _ => "other",
    }
}

pub fn stream_metrics(sessions: &[Session]) -> StreamMetrics {
    let mut m = StreamMetrics {
        streams_active: sessions.len() as u64,
        ..Default::default()
    };
    for tier in QUALITY_TIERS {
        m.streams_by_quality.insert(tier.to_string(), 0);
    }

    let mut total_kbps = 0.0;
    for session in sessions {
        total_kbps += session.bitrate_kbps.max(0.0);
        if session.is_transcoding() {
            m.transcoding_active += 1;
        }

        let np = &session.now_playing;
        *m.streams_by_channel
            .entry((np.channel_name.clone(), np.channel_number.clone()))
            .or_default() += 1;
        *m.streams_by_quality
            .entry(quality_tier(session.height).to_string())
            .or_default() += 1;
        *m.streams_by_method
            .entry(session.play_method.as_str().to_string())
            .or_default() += 1;
        *m.concurrent_streams_per_user
            .entry(session.user.clone())
            .or_default() += 1;
    }

    m.users_watching = m.concurrent_streams_per_user.len() as u64;
    m.bandwidth_total_mbps = total_kbps / 1000.0;
    m.transcoding_ratio = if sessions.is_empty() {
        0.0
    } else {
        m.transcoding_active as f64 / sessions.len() as f64
    };
    m.channel_popularity = channel_popularity(sessions);
    m
}

/// Popularity per channel name in `[0, 100]`.
///
/// A channel's weight is the mean of its share of viewers and its share of
/// bandwidth (viewer share alone when no bandwidth is reported). Scores are
/// weights normalized so the heaviest channel scores 100. Channels without
/// viewers are not listed.
pub fn channel_popularity(sessions: &[Session]) -> BTreeMap<String, f64> {
    let mut per_channel: AHashMap<&str, (f64, f64)> = AHashMap::new();
    let mut total_kbps = 0.0;
    for session in sessions {
        let kbps = session.bitrate_kbps.max(0.0);
        let entry = per_channel
            .entry(session.now_playing.channel_name.as_str())
            .or_default();
        entry.0 += 1.0;
        entry.1 += kbps;
        total_kbps += kbps;
    }

    let viewers = sessions.len() as f64;
    let weights: Vec<(&str, f64)> = per_channel
        .into_iter()
        .map(|(name, (count, kbps))| {
            let viewer_share = count / viewers;
            let weight = if total_kbps > 0.0 {
                0.5 * viewer_share + 0.5 * (kbps / total_kbps)
            } else {
                viewer_share
            };
            (name, weight)
        })
        .collect();

    let max = weights.iter().map(|(_, w)| *w).fold(0.0, f64::max);
    if max <= 0.0 {
        return BTreeMap::new();
    }
    weights
        .into_iter()
        .map(|(name, w)| (name.to_string(), (w / max * 100.0).clamp(0.0, 100.0)))
        .collect()
}

/// Channel totals; `tuners` is used to resolve which tuner carries each channel.
pub fn channel_metrics(channels: &[Channel], tuners: Option<&[Tuner]>) -> ChannelMetrics {
    let assigned: AHashMap<&str, &str> = tuners
        .unwrap_or_default()
        .iter()
        .filter(|t| t.status == TunerStatus::Active)
        .filter_map(|t| Some((t.channel_id.as_deref()?, t.name.as_str())))
        .collect();

    let mut m = ChannelMetrics {
        total: channels.len() as u64,
        ..Default::default()
    };
    for channel in channels {
        if channel.available {
            m.available += 1;
        }
        if channel.is_hd {
            m.hd += 1;
        }
        if channel.is_favorite {
            m.favorites += 1;
        }
        *m.by_type.entry(channel.category.clone()).or_default() += 1;
        m.statuses.push(ChannelStatus {
            id: channel.id.clone(),
            name: channel.name.clone(),
            number: channel.number.clone(),
            available: channel.available,
            tuner: assigned.get(channel.id.as_str()).map(|s| s.to_string()),
        });
    }
    m
}

pub fn tuner_metrics(tuners: &[Tuner]) -> TunerMetrics {
    let total = tuners.len() as u64;
    let in_use = tuners
        .iter()
        .filter(|t| t.status == TunerStatus::Active)
        .count() as u64;
    let errored = tuners
        .iter()
        .filter(|t| t.status == TunerStatus::Error)
        .count() as u64;

    TunerMetrics {
        total,
        in_use,
        available: total.saturating_sub(in_use + errored),
        errored,
        utilization_percent: if total == 0 {
            0.0
        } else {
            in_use as f64 / total as f64 * 100.0
        },
        tuners: tuners
            .iter()
            .map(|t| TunerState {
                id: t.id.clone(),
                name: t.name.clone(),
                kind: t.kind.clone(),
                in_use: t.status == TunerStatus::Active,
                channel: t.channel_name.clone().unwrap_or_else(|| "none".to_string()),
            })
            .collect(),
    }
}

pub fn recording_metrics(
    timers: &[Timer],
    recordings: &[Recording],
    now: DateTime<Utc>,
) -> RecordingMetrics {
    let count = |status: TimerStatus| timers.iter().filter(|t| t.status == status).count() as u64;

    let in_progress = recordings.iter().filter(|r| r.in_progress).count() as u64;
    let storage_bytes: u64 = recordings.iter().map(|r| r.size_bytes).sum();

    let remaining_seconds: f64 = timers
        .iter()
        .filter(|t| matches!(t.status, TimerStatus::Scheduled | TimerStatus::Recording))
        .filter_map(|t| {
            let end = t.end?;
            let start = t.start.map_or(now, |s| s.max(now));
            (end > start).then(|| (end - start).num_seconds() as f64)
        })
        .sum();

    RecordingMetrics {
        active: in_progress.max(count(TimerStatus::Recording)),
        scheduled: count(TimerStatus::Scheduled),
        series: timers.iter().filter(|t| t.is_series).count() as u64,
        conflicts: timers.iter().filter(|t| t.in_conflict).count() as u64,
        failed: count(TimerStatus::Failed),
        storage_used_gb: storage_bytes as f64 / BYTES_PER_GB,
        scheduled_storage_estimate_gb: remaining_seconds * ESTIMATED_RECORDING_KBPS * 1000.0
            / 8.0
            / BYTES_PER_GB,
    }
}

pub fn guide_metrics(programs: &[Program], window: &GuideWindow, now: DateTime<Utc>) -> GuideMetrics {
    let next_hour = now + Duration::hours(1);
    let mut m = GuideMetrics::default();
    let mut duration_sum = 0.0;
    let mut duration_count = 0u64;

    for program in programs {
        let Some(start) = program.start else {
            continue;
        };
        if start >= now && start < next_hour {
            m.upcoming_next_hour += 1;
        }
        if start < window.day_start || start >= window.day_end {
            continue;
        }

        m.programs_today += 1;
        if program.genres.is_empty() {
            *m.programs_by_genre.entry("Unknown".to_string()).or_default() += 1;
        }
        for genre in &program.genres {
            *m.programs_by_genre.entry(genre.clone()).or_default() += 1;
        }
        if let Some(minutes) = program.duration_minutes() {
            duration_sum += minutes;
            duration_count += 1;
        }
    }

    if duration_count > 0 {
        m.average_duration_minutes = duration_sum / duration_count as f64;
    }
    m
}

/// Builds the snapshot of one cycle.
///
/// `store` is updated only from a successful session fetch. `previous` is
/// the last published snapshot; failed groups are carried over from it.
pub fn aggregate(
    input: &CycleInput,
    store: &mut StateStore,
    previous: Option<&Snapshot>,
    now: DateTime<Utc>,
) -> Snapshot {
    let streams = match &input.sessions {
        Ok(sessions) => Group::fresh(stream_metrics(sessions), now),
        Err(_) => Group::carried_over(previous.map(|p| &p.streams)),
    };

    let history = match (&input.sessions, &streams.data) {
        (Ok(sessions), Some(stream)) => {
            store.observe_sessions(sessions, stream.users_watching, now);
            Group::fresh(store.history(now), now)
        }
        _ => Group::carried_over(previous.map(|p| &p.history)),
    };

    let channels = match &input.channels {
        Ok(channels) => {
            let tuners = input.tuners.as_ref().ok().map(|t| t.as_slice());
            Group::fresh(channel_metrics(channels, tuners), now)
        }
        Err(_) => Group::carried_over(previous.map(|p| &p.channels)),
    };

    let tuners = match &input.tuners {
        Ok(tuners) => Group::fresh(tuner_metrics(tuners), now),
        Err(_) => Group::carried_over(previous.map(|p| &p.tuners)),
    };

    let recordings = match (&input.timers, &input.recordings) {
        (Ok(timers), Ok(recordings)) => {
            Group::fresh(recording_metrics(timers, recordings, now), now)
        }
        _ => Group::carried_over(previous.map(|p| &p.recordings)),
    };

    let guide = match &input.programs {
        Some(Ok(programs)) => {
            let mut m = guide_metrics(programs, &input.guide_window, now);
            m.days_available = match &input.guide_days {
                Some(Ok(days)) => *days,
                _ => previous
                    .and_then(|p| p.guide.data.as_ref())
                    .map_or(0, |g| g.days_available),
            };
            Group::fresh(m, now)
        }
        Some(Err(_)) => Group::carried_over(previous.map(|p| &p.guide)),
        None => Group::default(),
    };

    let server = match &input.server {
        Ok(Some(info)) => Some(info.as_ref().clone()),
        _ => previous.and_then(|p| p.server.clone()),
    };

    Snapshot {
        up: input.server.is_ok() && !input.unreachable && !input.has_auth_failure(),
        server,
        streams,
        channels,
        tuners,
        recordings,
        guide,
        history,
        completed_at: now,
        cycle_duration_seconds: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::model::{NowPlaying, PlayMethod, ServerInfo};
    use chrono::{NaiveDate, TimeZone};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 30, 0).unwrap()
    }

    fn session(id: &str, user: &str, channel: &str, kbps: f64) -> Session {
        Session {
            id: id.to_string(),
            user: user.to_string(),
            client: "Emby Theater".to_string(),
            device: "Living Room".to_string(),
            now_playing: NowPlaying {
                channel_id: format!("id-{channel}"),
                channel_name: channel.to_string(),
                channel_number: "2".to_string(),
            },
            play_method: PlayMethod::DirectStream,
            bitrate_kbps: kbps,
            height: Some(720),
            framerate: Some(50.0),
            position_seconds: 12.0,
            paused: false,
        }
    }

    fn window() -> GuideWindow {
        GuideWindow {
            day_start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            day_end: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
            fetch_end: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
            day: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        }
    }

    fn input(sessions: Vec<Session>) -> CycleInput {
        CycleInput {
            server: Ok(Some(Arc::new(ServerInfo {
                id: "srv".into(),
                name: "media".into(),
                version: "4.8.0.0".into(),
                operating_system: "Linux".into(),
                has_live_tv: true,
            }))),
            sessions: Ok(Arc::new(sessions)),
            channels: Ok(Arc::new(Vec::new())),
            tuners: Ok(Arc::new(Vec::new())),
            timers: Ok(Arc::new(Vec::new())),
            recordings: Ok(Arc::new(Vec::new())),
            programs: None,
            guide_days: None,
            guide_window: window(),
            unreachable: false,
        }
    }

    fn refused(endpoint: &str) -> ApiError {
        ApiError::Transient {
            endpoint: endpoint.to_string(),
            message: "connection refused".to_string(),
        }
    }

    #[test]
    fn test_quality_tier_bounds_are_inclusive() {
        assert_eq!(quality_tier(Some(2160)), "4K");
        assert_eq!(quality_tier(Some(2159)), "1080p");
        assert_eq!(quality_tier(Some(1080)), "1080p");
        assert_eq!(quality_tier(Some(720)), "720p");
        assert_eq!(quality_tier(Some(480)), "480p");
        assert_eq!(quality_tier(Some(479)), "other");
        assert_eq!(quality_tier(None), "other");
    }

    #[test]
    fn test_no_sessions() {
        let m = stream_metrics(&[]);
        assert_eq!(m.streams_active, 0);
        assert_eq!(m.users_watching, 0);
        assert_eq!(m.transcoding_ratio, 0.0);
        assert_eq!(m.bandwidth_total_mbps, 0.0);
        assert!(m.channel_popularity.is_empty());
        assert_eq!(m.streams_by_quality.len(), QUALITY_TIERS.len());
    }

    #[test]
    fn test_two_sessions_on_one_channel() {
        let sessions = vec![
            session("a", "alice", "CNN", 5000.0),
            session("b", "bob", "CNN", 3000.0),
        ];
        let m = stream_metrics(&sessions);
        assert_eq!(m.bandwidth_total_mbps, 8.0);
        assert_eq!(m.channel_popularity["CNN"], 100.0);
        assert_eq!(m.streams_by_channel[&("CNN".to_string(), "2".to_string())], 2);
        assert_eq!(m.users_watching, 2);
        assert_eq!(m.streams_by_quality["720p"], 2);
    }

    #[test]
    fn test_popularity_bounds() {
        let sessions = vec![
            session("a", "alice", "CNN", 8000.0),
            session("b", "bob", "CNN", 6000.0),
            session("c", "carol", "ESPN", 2000.0),
            session("d", "dave", "BBC", 0.0),
        ];
        let popularity = channel_popularity(&sessions);
        assert_eq!(popularity.len(), 3);
        assert_eq!(popularity["CNN"], 100.0);
        for score in popularity.values() {
            assert!((0.0..=100.0).contains(score));
        }
        assert!(popularity["ESPN"] > popularity["BBC"]);
    }

    #[test]
    fn test_popularity_without_bandwidth_uses_viewers() {
        let sessions = vec![
            session("a", "alice", "CNN", 0.0),
            session("b", "bob", "CNN", 0.0),
            session("c", "carol", "ESPN", 0.0),
        ];
        let popularity = channel_popularity(&sessions);
        assert_eq!(popularity["CNN"], 100.0);
        assert_eq!(popularity["ESPN"], 50.0);
    }

    #[test]
    fn test_transcoding_ratio() {
        let mut transcoded = session("a", "alice", "CNN", 4000.0);
        transcoded.play_method = PlayMethod::Transcode;
        let m = stream_metrics(&[transcoded, session("b", "alice", "ESPN", 4000.0)]);
        assert_eq!(m.transcoding_active, 1);
        assert_eq!(m.transcoding_ratio, 0.5);
        assert_eq!(m.concurrent_streams_per_user["alice"], 2);
        assert_eq!(m.streams_by_method["Transcode"], 1);
    }

    #[test]
    fn test_tuner_utilization() {
        assert_eq!(tuner_metrics(&[]).utilization_percent, 0.0);

        let tuner = |id: &str, status: TunerStatus| Tuner {
            id: id.to_string(),
            name: format!("Tuner {id}"),
            kind: "HDHomeRun".to_string(),
            status,
            channel_id: (status == TunerStatus::Active).then(|| "id-CNN".to_string()),
            channel_name: (status == TunerStatus::Active).then(|| "CNN".to_string()),
        };
        let tuners = [
            tuner("1", TunerStatus::Active),
            tuner("2", TunerStatus::Idle),
            tuner("3", TunerStatus::Error),
            tuner("4", TunerStatus::Idle),
        ];
        let m = tuner_metrics(&tuners);
        assert_eq!(m.in_use, 1);
        assert_eq!(m.errored, 1);
        assert_eq!(m.available, 2);
        assert_eq!(m.utilization_percent, 25.0);
        assert_eq!(m.tuners[1].channel, "none");

        let channels = [Channel {
            id: "id-CNN".into(),
            name: "CNN".into(),
            number: "2".into(),
            category: "TV".into(),
            is_hd: true,
            is_favorite: false,
            available: true,
        }];
        let cm = channel_metrics(&channels, Some(&tuners));
        assert_eq!(cm.statuses[0].tuner.as_deref(), Some("Tuner 1"));
        assert_eq!(cm.hd, 1);
        assert_eq!(cm.by_type["TV"], 1);
    }

    #[test]
    fn test_recording_metrics() {
        let timer = |status: TimerStatus, start_h: i64, end_h: i64| Timer {
            id: format!("{status:?}"),
            channel_id: None,
            start: Some(now() + Duration::hours(start_h)),
            end: Some(now() + Duration::hours(end_h)),
            status,
            is_series: status == TimerStatus::Scheduled,
            in_conflict: status == TimerStatus::Failed,
        };
        let timers = [
            timer(TimerStatus::Scheduled, 1, 2),
            timer(TimerStatus::Recording, -1, 1),
            timer(TimerStatus::Failed, -3, -2),
        ];
        let recordings = [
            Recording {
                id: "r1".into(),
                size_bytes: 1024 * 1024 * 1024,
                in_progress: false,
            },
            Recording {
                id: "r2".into(),
                size_bytes: 512 * 1024 * 1024,
                in_progress: true,
            },
        ];
        let m = recording_metrics(&timers, &recordings, now());
        assert_eq!(m.active, 1);
        assert_eq!(m.scheduled, 1);
        assert_eq!(m.series, 1);
        assert_eq!(m.conflicts, 1);
        assert_eq!(m.failed, 1);
        assert_eq!(m.storage_used_gb, 1.5);

        // Two hours of remaining recording at the assumed bitrate.
        let expected = 7200.0 * ESTIMATED_RECORDING_KBPS * 1000.0 / 8.0 / BYTES_PER_GB;
        assert!((m.scheduled_storage_estimate_gb - expected).abs() < 1e-9);
    }

    #[test]
    fn test_guide_metrics() {
        let program = |id: &str, start_min: i64, len_min: i64, genres: &[&str]| Program {
            id: id.to_string(),
            channel_id: None,
            genres: genres.iter().map(|g| g.to_string()).collect(),
            start: Some(now() + Duration::minutes(start_min)),
            end: Some(now() + Duration::minutes(start_min + len_min)),
        };
        let programs = [
            program("news", -30, 60, &["News"]),
            program("match", 30, 120, &["Sports"]),
            program("film", 90, 90, &["Movie", "Drama"]),
            program("late", 240, 60, &[]),
        ];
        let m = guide_metrics(&programs, &window(), now());
        assert_eq!(m.programs_today, 3);
        assert_eq!(m.upcoming_next_hour, 1);
        assert_eq!(m.programs_by_genre["News"], 1);
        assert_eq!(m.programs_by_genre["Drama"], 1);
        assert!(!m.programs_by_genre.contains_key("Unknown"));
        assert_eq!(m.average_duration_minutes, 90.0);
    }

    #[test]
    fn test_failed_group_is_carried_over_stale() {
        let mut store = StateStore::new();
        let first = aggregate(
            &input(vec![session("a", "alice", "CNN", 5000.0)]),
            &mut store,
            None,
            now(),
        );
        assert!(first.up);
        assert!(!first.is_degraded());

        let mut failing = input(Vec::new());
        failing.sessions = Err(refused("/Sessions"));
        let second = aggregate(&failing, &mut store, Some(&first), now() + Duration::seconds(30));

        assert!(second.up);
        assert!(second.streams.stale);
        assert!(second.history.stale);
        assert!(!second.channels.stale);
        assert_eq!(second.streams.data.as_ref().unwrap().streams_active, 1);
        assert_eq!(second.stale_groups().collect::<Vec<_>>(), vec!["streams", "history"]);
    }

    #[test]
    fn test_failed_group_without_history_is_absent() {
        let mut store = StateStore::new();
        let mut failing = input(Vec::new());
        failing.channels = Err(refused("/LiveTv/Channels"));
        let snapshot = aggregate(&failing, &mut store, None, now());
        assert!(snapshot.channels.data.is_none());
        assert!(!snapshot.channels.stale);
    }

    #[test]
    fn test_auth_failure_marks_down() {
        let mut store = StateStore::new();
        let mut denied = input(Vec::new());
        denied.timers = Err(ApiError::Auth {
            endpoint: "/LiveTv/Timers".into(),
            status: 401,
        });
        let snapshot = aggregate(&denied, &mut store, None, now());
        assert!(!snapshot.up);
        assert!(snapshot.is_degraded());
    }

    #[test]
    fn test_unreachable_server_marks_down_despite_cached_info() {
        let mut store = StateStore::new();
        let mut cut_off = input(Vec::new());
        cut_off.sessions = Err(refused("/Sessions"));
        cut_off.unreachable = true;
        let snapshot = aggregate(&cut_off, &mut store, None, now());
        assert!(!snapshot.up);
        assert!(snapshot.is_degraded());
    }
}
