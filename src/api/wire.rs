//! Emby JSON payloads and their normalization into [`crate::model`] types.
//!
//! Every field is optional on the wire; missing values fall back to the same
//! placeholders the dashboards expect ("unknown", "N/A").

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::model::{
    Channel, NowPlaying, PlayMethod, Program, Recording, ServerInfo, Session, TimerStatus, Timer,
    Tuner, TunerStatus,
};

/// Emby reports positions in 100ns ticks.
const TICKS_PER_SECOND: f64 = 10_000_000.0;

/// Item type of a live TV channel in a session's now-playing item.
const LIVE_TV_ITEM_TYPE: &str = "TvChannel";

/// Emby timestamps may carry more fractional digits than RFC 3339 parsers accept,
/// and older servers omit the offset entirely.
static EMBY_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})(?:\.(\d+))?(Z|[+-]\d{2}:\d{2})?$")
        .expect("static regex")
});

/// Parses an Emby timestamp, returning `None` for anything unrecognized.
pub fn parse_emby_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let caps = EMBY_DATETIME.captures(raw)?;
    let base = caps.get(1)?.as_str();
    let micros: String = caps
        .get(2)
        .map(|m| m.as_str().chars().take(6).collect())
        .unwrap_or_default();
    let offset = match caps.get(3).map(|m| m.as_str()) {
        Some("Z") | None => "+00:00",
        Some(other) => other,
    };

    let normalized = if micros.is_empty() {
        format!("{base}{offset}")
    } else {
        format!("{base}.{micros}{offset}")
    };
    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(base, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn opt_datetime(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().and_then(parse_emby_datetime)
}

fn or_placeholder(value: Option<String>, placeholder: &str) -> String {
    value
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| placeholder.to_string())
}

/// Paged list wrapper used by most `/LiveTv/*` endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    pub total_record_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfoDto {
    pub id: Option<String>,
    pub server_name: Option<String>,
    pub version: Option<String>,
    pub operating_system: Option<String>,
    #[serde(default)]
    pub has_live_tv: Option<bool>,
}

impl From<SystemInfoDto> for ServerInfo {
    fn from(dto: SystemInfoDto) -> Self {
        ServerInfo {
            id: or_placeholder(dto.id, "unknown"),
            name: or_placeholder(dto.server_name, "unknown"),
            version: or_placeholder(dto.version, "unknown"),
            operating_system: or_placeholder(dto.operating_system, "unknown"),
            has_live_tv: dto.has_live_tv.unwrap_or(false),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaStreamDto {
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    pub height: Option<f64>,
    pub bit_rate: Option<f64>,
    pub real_frame_rate: Option<f64>,
    pub average_frame_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NowPlayingDto {
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub channel_number: Option<String>,
    pub number: Option<String>,
    #[serde(default)]
    pub media_streams: Vec<MediaStreamDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayStateDto {
    pub play_method: Option<String>,
    pub position_ticks: Option<f64>,
    #[serde(default)]
    pub is_paused: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscodingInfoDto {
    pub bitrate: Option<f64>,
    pub height: Option<f64>,
    pub framerate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionDto {
    pub id: Option<String>,
    pub user_name: Option<String>,
    pub client: Option<String>,
    pub device_name: Option<String>,
    pub now_playing_item: Option<NowPlayingDto>,
    #[serde(default)]
    pub play_state: Option<PlayStateDto>,
    pub transcoding_info: Option<TranscodingInfoDto>,
}

impl SessionDto {
    /// Converts an upstream session, dropping anything that is not Live TV playback.
    pub fn into_live_tv_session(self) -> Option<Session> {
        let item = self.now_playing_item?;
        if item.kind.as_deref() != Some(LIVE_TV_ITEM_TYPE) {
            return None;
        }

        let play_state = self.play_state.unwrap_or_default();
        let video = item
            .media_streams
            .iter()
            .find(|s| s.kind.as_deref() == Some("Video"));

        // Transcoding info describes what the client actually receives; the
        // source video stream is the fallback for direct play.
        let transcode = self.transcoding_info.as_ref();
        let bitrate_bps = transcode
            .and_then(|t| t.bitrate)
            .filter(|b| *b > 0.0)
            .or_else(|| video.and_then(|v| v.bit_rate))
            .unwrap_or(0.0);
        let height = transcode
            .and_then(|t| t.height)
            .filter(|h| *h > 0.0)
            .or_else(|| video.and_then(|v| v.height))
            .filter(|h| *h > 0.0)
            .map(|h| h as u32);
        let framerate = transcode
            .and_then(|t| t.framerate)
            .filter(|f| *f > 0.0)
            .or_else(|| video.and_then(|v| v.real_frame_rate.or(v.average_frame_rate)))
            .filter(|f| *f > 0.0);

        Some(Session {
            id: or_placeholder(self.id, "unknown"),
            user: or_placeholder(self.user_name, "unknown"),
            client: or_placeholder(self.client, "unknown"),
            device: or_placeholder(self.device_name, "unknown"),
            now_playing: NowPlaying {
                channel_id: or_placeholder(item.id, "unknown"),
                channel_name: or_placeholder(item.name, "Unknown Channel"),
                channel_number: or_placeholder(item.channel_number.or(item.number), "N/A"),
            },
            play_method: play_state
                .play_method
                .as_deref()
                .map(PlayMethod::parse)
                .unwrap_or(PlayMethod::Unknown),
            bitrate_kbps: bitrate_bps / 1000.0,
            height,
            framerate,
            position_seconds: play_state.position_ticks.unwrap_or(0.0) / TICKS_PER_SECOND,
            paused: play_state.is_paused,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDataDto {
    #[serde(default)]
    pub is_favorite: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelDto {
    pub id: Option<String>,
    pub name: Option<String>,
    pub channel_number: Option<String>,
    pub number: Option<String>,
    pub channel_type: Option<String>,
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    #[serde(rename = "IsHD", default)]
    pub is_hd: bool,
    #[serde(default)]
    pub is_disabled: bool,
    pub user_data: Option<UserDataDto>,
}

impl From<ChannelDto> for Channel {
    fn from(dto: ChannelDto) -> Self {
        let name = or_placeholder(dto.name, "Unknown");
        let is_hd = dto.is_hd || name.to_uppercase().contains("HD");
        Channel {
            available: dto.id.is_some() && !dto.is_disabled,
            id: or_placeholder(dto.id, "unknown"),
            number: or_placeholder(dto.channel_number.or(dto.number), "N/A"),
            category: or_placeholder(dto.channel_type.or(dto.kind), "Unknown"),
            is_hd,
            is_favorite: dto.user_data.map(|u| u.is_favorite).unwrap_or(false),
            name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TunerDto {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
}

impl From<TunerDto> for Tuner {
    fn from(dto: TunerDto) -> Self {
        let channel_id = dto.channel_id.filter(|s| !s.is_empty());
        let status = match dto.status.as_deref() {
            Some("Error") | Some("Disabled") => TunerStatus::Error,
            Some("LiveTv") | Some("RecordingTv") => TunerStatus::Active,
            _ if channel_id.is_some() => TunerStatus::Active,
            _ => TunerStatus::Idle,
        };
        Tuner {
            id: or_placeholder(dto.id, "unknown"),
            name: or_placeholder(dto.name, "Unknown Tuner"),
            kind: or_placeholder(dto.kind, "Unknown"),
            status,
            channel_id,
            channel_name: dto.channel_name.filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimerDto {
    pub id: Option<String>,
    pub channel_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub series_timer_id: Option<String>,
}

impl From<TimerDto> for Timer {
    fn from(dto: TimerDto) -> Self {
        let raw_status = dto.status.as_deref().unwrap_or("New");
        Timer {
            start: opt_datetime(&dto.start_date),
            end: opt_datetime(&dto.end_date),
            status: TimerStatus::parse(raw_status),
            in_conflict: raw_status.starts_with("Conflicted"),
            is_series: dto.series_timer_id.is_some_and(|s| !s.is_empty()),
            id: or_placeholder(dto.id, "unknown"),
            channel_id: dto.channel_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordingDto {
    pub id: Option<String>,
    pub size: Option<f64>,
    pub status: Option<String>,
    pub is_in_progress: Option<bool>,
}

impl From<RecordingDto> for Recording {
    fn from(dto: RecordingDto) -> Self {
        Recording {
            id: or_placeholder(dto.id, "unknown"),
            size_bytes: dto.size.filter(|s| *s > 0.0).map(|s| s as u64).unwrap_or(0),
            in_progress: dto
                .is_in_progress
                .unwrap_or_else(|| dto.status.as_deref() == Some("InProgress")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProgramDto {
    pub id: Option<String>,
    pub channel_id: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl From<ProgramDto> for Program {
    fn from(dto: ProgramDto) -> Self {
        Program {
            id: or_placeholder(dto.id, "unknown"),
            channel_id: dto.channel_id,
            genres: dto.genres,
            start: opt_datetime(&dto.start_date),
            end: opt_datetime(&dto.end_date),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_emby_datetime_variants() {
        let dt = parse_emby_datetime("2024-05-01T18:30:00.0000000Z").unwrap();
        assert_eq!((dt.hour(), dt.minute()), (18, 30));

        let dt = parse_emby_datetime("2024-05-01T18:30:00.12345678901+02:00").unwrap();
        assert_eq!(dt.hour(), 16);

        let dt = parse_emby_datetime("2024-05-01T18:30:00").unwrap();
        assert_eq!((dt.day(), dt.hour()), (1, 18));

        assert!(parse_emby_datetime("").is_none());
        assert!(parse_emby_datetime("yesterday").is_none());
    }

    #[test]
    fn test_session_filters_non_live_tv() {
        let json = r#"[
            {"Id": "a", "UserName": "alice", "NowPlayingItem": {"Type": "Movie", "Name": "Film"}},
            {"Id": "b", "UserName": "bob"},
            {"Id": "c", "UserName": "carol",
             "NowPlayingItem": {"Type": "TvChannel", "Id": "ch1", "Name": "CNN", "ChannelNumber": "202"},
             "PlayState": {"PlayMethod": "Transcode", "PositionTicks": 600000000},
             "TranscodingInfo": {"Bitrate": 5000000, "Height": 1080, "Framerate": 29.97}}
        ]"#;
        let dtos: Vec<SessionDto> = serde_json::from_str(json).unwrap();
        let sessions: Vec<Session> = dtos
            .into_iter()
            .filter_map(SessionDto::into_live_tv_session)
            .collect();

        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.user, "carol");
        assert_eq!(s.now_playing.channel_name, "CNN");
        assert_eq!(s.now_playing.channel_number, "202");
        assert_eq!(s.play_method, PlayMethod::Transcode);
        assert_eq!(s.bitrate_kbps, 5000.0);
        assert_eq!(s.height, Some(1080));
        assert_eq!(s.position_seconds, 60.0);
    }

    #[test]
    fn test_direct_play_falls_back_to_video_stream() {
        let json = r#"{"Id": "d", "UserName": "dave",
            "NowPlayingItem": {"Type": "TvChannel", "Name": "ESPN",
                "MediaStreams": [{"Type": "Audio", "BitRate": 192000},
                                 {"Type": "Video", "BitRate": 8000000, "Height": 720, "RealFrameRate": 59.94}]},
            "PlayState": {"PlayMethod": "DirectPlay"}}"#;
        let dto: SessionDto = serde_json::from_str(json).unwrap();
        let s = dto.into_live_tv_session().unwrap();
        assert_eq!(s.bitrate_kbps, 8000.0);
        assert_eq!(s.height, Some(720));
        assert_eq!(s.framerate, Some(59.94));
        assert!(!s.is_transcoding());
    }

    #[test]
    fn test_channel_normalization() {
        let json = r#"{"Id": "1", "Name": "BBC One HD", "Number": "101", "ChannelType": "TV",
                       "UserData": {"IsFavorite": true}}"#;
        let channel: Channel = serde_json::from_str::<ChannelDto>(json).unwrap().into();
        assert!(channel.is_hd);
        assert!(channel.is_favorite);
        assert!(channel.available);
        assert_eq!(channel.number, "101");
        assert_eq!(channel.category, "TV");

        let disabled: Channel = serde_json::from_str::<ChannelDto>(r#"{"Id": "2", "IsDisabled": true}"#)
            .unwrap()
            .into();
        assert!(!disabled.available);
        assert_eq!(disabled.name, "Unknown");
    }

    #[test]
    fn test_tuner_status_mapping() {
        let active: Tuner = serde_json::from_str::<TunerDto>(r#"{"Id": "t1", "ChannelId": "ch1"}"#)
            .unwrap()
            .into();
        assert_eq!(active.status, TunerStatus::Active);

        let idle: Tuner = serde_json::from_str::<TunerDto>(r#"{"Id": "t2", "Status": "Available"}"#)
            .unwrap()
            .into();
        assert_eq!(idle.status, TunerStatus::Idle);

        let broken: Tuner = serde_json::from_str::<TunerDto>(r#"{"Id": "t3", "Status": "Disabled"}"#)
            .unwrap()
            .into();
        assert_eq!(broken.status, TunerStatus::Error);
    }

    #[test]
    fn test_timer_conflict_and_series() {
        let json = r#"{"Id": "x", "Status": "ConflictedNotOk", "SeriesTimerId": "s1",
                       "StartDate": "2024-05-01T20:00:00.0000000Z", "EndDate": "2024-05-01T21:00:00.0000000Z"}"#;
        let timer: Timer = serde_json::from_str::<TimerDto>(json).unwrap().into();
        assert!(timer.in_conflict);
        assert!(timer.is_series);
        assert_eq!(timer.status, TimerStatus::Failed);
        assert_eq!(timer.duration_seconds(), 3600.0);
    }
}
