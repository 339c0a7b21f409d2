//! Normalized Live TV domain types.
//!
//! These are the shapes the aggregation engine works on. Upstream JSON is
//! converted into them by [`crate::api::wire`].

use chrono::{DateTime, Utc};

/// How a session is being delivered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayMethod {
    DirectPlay,
    DirectStream,
    Transcode,
    Unknown,
}

impl PlayMethod {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "DirectPlay" => PlayMethod::DirectPlay,
            "DirectStream" => PlayMethod::DirectStream,
            "Transcode" => PlayMethod::Transcode,
            _ => PlayMethod::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayMethod::DirectPlay => "DirectPlay",
            PlayMethod::DirectStream => "DirectStream",
            PlayMethod::Transcode => "Transcode",
            PlayMethod::Unknown => "Unknown",
        }
    }
}

/// The channel a session is currently tuned to.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub channel_id: String,
    pub channel_name: String,
    pub channel_number: String,
}

/// One active Live TV playback.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Upstream session id. Used for cycle-to-cycle correlation only, never exported.
    pub id: String,
    pub user: String,
    pub client: String,
    pub device: String,
    pub now_playing: NowPlaying,
    pub play_method: PlayMethod,
    pub bitrate_kbps: f64,
    pub height: Option<u32>,
    pub framerate: Option<f64>,
    pub position_seconds: f64,
    pub paused: bool,
}

impl Session {
    pub fn is_transcoding(&self) -> bool {
        self.play_method == PlayMethod::Transcode
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub number: String,
    pub category: String,
    pub is_hd: bool,
    pub is_favorite: bool,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerStatus {
    Idle,
    Active,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tuner {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub status: TunerStatus,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    Scheduled,
    Recording,
    Completed,
    Failed,
    Cancelled,
}

impl TimerStatus {
    /// Maps the upstream `RecordingStatus` vocabulary.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "InProgress" => TimerStatus::Recording,
            "Completed" => TimerStatus::Completed,
            "Cancelled" => TimerStatus::Cancelled,
            "Error" | "ConflictedNotOk" => TimerStatus::Failed,
            _ => TimerStatus::Scheduled,
        }
    }
}

/// A scheduled or running recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    pub id: String,
    pub channel_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: TimerStatus,
    pub is_series: bool,
    pub in_conflict: bool,
}

impl Timer {
    /// Length of the schedule window, zero when either bound is unknown.
    pub fn duration_seconds(&self) -> f64 {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end > start => (end - start).num_seconds() as f64,
            _ => 0.0,
        }
    }
}

/// A recording already present on disk (possibly still growing).
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub id: String,
    pub size_bytes: u64,
    pub in_progress: bool,
}

/// An entry from the program guide.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub id: String,
    pub channel_id: Option<String>,
    pub genres: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Program {
    pub fn duration_minutes(&self) -> Option<f64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end >= start => {
                Some((end - start).num_seconds() as f64 / 60.0)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub operating_system: String,
    pub has_live_tv: bool,
}
