//! Prometheus metrics definitions for the Live TV exporter.
//!
//! Snapshot metrics are registered in a fresh [`Registry`] every time a
//! snapshot is published, so label sets of channels or users that disappeared
//! upstream vanish with the next refresh. Exporter self-telemetry lives in a
//! long-lived registry owned by [`ExporterTelemetry`].

use prometheus::{
    CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::snapshot::{
    ChannelMetrics, GuideMetrics, HistoryMetrics, RecordingMetrics, Snapshot, StreamMetrics,
    TunerMetrics,
};

/// Buckets for upstream request latency in seconds.
const API_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Buckets for whole refresh cycles in seconds.
const CYCLE_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<Gauge> {
    let g = Gauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let g = IntGauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<GaugeVec> {
    let g = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn int_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<IntGaugeVec> {
    let g = IntGaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn int_counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<IntCounterVec> {
    let c = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

/// Encodes every family of `registry` in the text exposition format.
pub fn encode(registry: &Registry) -> prometheus::Result<String> {
    let mut out = String::with_capacity(16 * 1024);
    TextEncoder::new().encode_utf8(&registry.gather(), &mut out)?;
    Ok(out)
}

/// Exposition served before the first cycle completed.
pub fn render_empty() -> prometheus::Result<String> {
    let registry = Registry::new();
    let up = int_gauge(&registry, "emby_up", "Emby server is up and responding")?;
    up.set(0);
    encode(&registry)
}

/// Renders a snapshot into a new registry and encodes it.
///
/// Only groups with data are registered, so a group that never refreshed
/// successfully is absent from the exposition rather than reported as zero.
pub fn render_snapshot(snapshot: &Snapshot) -> prometheus::Result<String> {
    let r = Registry::new();
    ServerMetrics::new(&r)?.observe(snapshot);
    if let Some(m) = &snapshot.streams.data {
        StreamGauges::new(&r)?.observe(m);
    }
    if let Some(m) = &snapshot.channels.data {
        ChannelGauges::new(&r)?.observe(m);
    }
    if let Some(m) = &snapshot.tuners.data {
        TunerGauges::new(&r)?.observe(m);
    }
    if let Some(m) = &snapshot.recordings.data {
        RecordingGauges::new(&r)?.observe(m);
    }
    if let Some(m) = &snapshot.guide.data {
        GuideGauges::new(&r)?.observe(m);
    }
    if let Some(m) = &snapshot.history.data {
        HistoryGauges::new(&r)?.observe(m);
    }
    encode(&r)
}

/// Liveness, server identity and refresh bookkeeping.
struct ServerMetrics {
    up: IntGauge,
    server_info: IntGaugeVec, // labels: id, name, version, os
    livetv_enabled: IntGaugeVec, // labels: server
    group_stale: IntGaugeVec,  // labels: group
    last_refresh_timestamp: Gauge,
    last_refresh_duration: Gauge,
}

impl ServerMetrics {
    fn new(r: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            up: int_gauge(r, "emby_up", "Emby server is up and responding")?,
            server_info: int_gauge_vec(
                r,
                "emby_server_info",
                "Emby server information",
                &["id", "name", "version", "os"],
            )?,
            livetv_enabled: int_gauge_vec(
                r,
                "emby_livetv_enabled",
                "Live TV feature is enabled",
                &["server"],
            )?,
            group_stale: int_gauge_vec(
                r,
                "emby_exporter_group_stale",
                "Metric group carried over from an earlier cycle (1=stale)",
                &["group"],
            )?,
            last_refresh_timestamp: gauge(
                r,
                "emby_exporter_last_refresh_timestamp_seconds",
                "Unix time the published snapshot was computed",
            )?,
            last_refresh_duration: gauge(
                r,
                "emby_exporter_last_refresh_duration_seconds",
                "Duration of the cycle that produced the published snapshot",
            )?,
        })
    }

    fn observe(&self, snapshot: &Snapshot) {
        self.up.set(snapshot.up as i64);
        if let Some(server) = &snapshot.server {
            self.server_info
                .with_label_values(&[
                    &server.id,
                    &server.name,
                    &server.version,
                    &server.operating_system,
                ])
                .set(1);
            self.livetv_enabled
                .with_label_values(&[&server.name])
                .set(server.has_live_tv as i64);
        }
        for (group, stale) in snapshot.group_freshness() {
            self.group_stale.with_label_values(&[group]).set(stale as i64);
        }
        self.last_refresh_timestamp
            .set(snapshot.completed_at.timestamp_millis() as f64 / 1000.0);
        self.last_refresh_duration.set(snapshot.cycle_duration_seconds);
    }
}

struct StreamGauges {
    streams_active: IntGauge,
    users_watching: IntGauge,
    bandwidth_total_mbps: Gauge,
    transcoding_active: IntGauge,
    transcoding_ratio: Gauge,
    streams_by_channel: IntGaugeVec, // labels: channel_name, channel_number
    streams_by_quality: IntGaugeVec, // labels: quality
    streams_by_method: IntGaugeVec,  // labels: method
    concurrent_streams: IntGaugeVec, // labels: user
    channel_popularity: GaugeVec,    // labels: channel_name
}

impl StreamGauges {
    fn new(r: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            streams_active: int_gauge(
                r,
                "emby_livetv_streams_active",
                "Number of active Live TV streams",
            )?,
            users_watching: int_gauge(
                r,
                "emby_livetv_users_watching",
                "Number of users watching Live TV",
            )?,
            bandwidth_total_mbps: gauge(
                r,
                "emby_livetv_bandwidth_total_mbps",
                "Total Live TV bandwidth in Mbps",
            )?,
            transcoding_active: int_gauge(
                r,
                "emby_livetv_transcoding_active",
                "Number of active transcoding sessions",
            )?,
            transcoding_ratio: gauge(
                r,
                "emby_livetv_transcoding_ratio",
                "Share of Live TV streams being transcoded (0.0-1.0)",
            )?,
            streams_by_channel: int_gauge_vec(
                r,
                "emby_livetv_streams_by_channel",
                "Active streams per channel",
                &["channel_name", "channel_number"],
            )?,
            streams_by_quality: int_gauge_vec(
                r,
                "emby_livetv_streams_by_quality",
                "Streams by quality",
                &["quality"],
            )?,
            streams_by_method: int_gauge_vec(
                r,
                "emby_livetv_streams_by_method",
                "Streams by play method",
                &["method"],
            )?,
            concurrent_streams: int_gauge_vec(
                r,
                "emby_livetv_concurrent_streams",
                "Concurrent streams per user",
                &["user"],
            )?,
            channel_popularity: gauge_vec(
                r,
                "emby_livetv_channel_popularity",
                "Channel popularity score (0-100)",
                &["channel_name"],
            )?,
        })
    }

    fn observe(&self, m: &StreamMetrics) {
        self.streams_active.set(m.streams_active as i64);
        self.users_watching.set(m.users_watching as i64);
        self.bandwidth_total_mbps.set(m.bandwidth_total_mbps);
        self.transcoding_active.set(m.transcoding_active as i64);
        self.transcoding_ratio.set(m.transcoding_ratio);

        for ((name, number), count) in &m.streams_by_channel {
            self.streams_by_channel
                .with_label_values(&[name, number])
                .set(*count as i64);
        }
        for (quality, count) in &m.streams_by_quality {
            self.streams_by_quality
                .with_label_values(&[quality])
                .set(*count as i64);
        }
        for (method, count) in &m.streams_by_method {
            self.streams_by_method
                .with_label_values(&[method])
                .set(*count as i64);
        }
        for (user, count) in &m.concurrent_streams_per_user {
            self.concurrent_streams
                .with_label_values(&[user])
                .set(*count as i64);
        }
        for (channel, score) in &m.channel_popularity {
            self.channel_popularity
                .with_label_values(&[channel])
                .set(*score);
        }
    }
}

struct ChannelGauges {
    channels_total: IntGauge,
    channels_available: IntGauge,
    channels_hd: IntGauge,
    channel_favorites: IntGauge,
    channels_by_type: IntGaugeVec, // labels: channel_type
    channel_status: IntGaugeVec,   // labels: channel_id, channel_name, channel_number, tuner
}

impl ChannelGauges {
    fn new(r: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            channels_total: int_gauge(
                r,
                "emby_livetv_channels_total",
                "Total number of Live TV channels",
            )?,
            channels_available: int_gauge(
                r,
                "emby_livetv_channels_available",
                "Number of available channels",
            )?,
            channels_hd: int_gauge(r, "emby_livetv_channels_hd", "Number of HD channels")?,
            channel_favorites: int_gauge(
                r,
                "emby_livetv_channel_favorites",
                "Favorite channels count",
            )?,
            channels_by_type: int_gauge_vec(
                r,
                "emby_livetv_channels_by_type",
                "Channels by type",
                &["channel_type"],
            )?,
            channel_status: int_gauge_vec(
                r,
                "emby_livetv_channel_status",
                "Channel availability (1=available, 0=unavailable)",
                &["channel_id", "channel_name", "channel_number", "tuner"],
            )?,
        })
    }

    fn observe(&self, m: &ChannelMetrics) {
        self.channels_total.set(m.total as i64);
        self.channels_available.set(m.available as i64);
        self.channels_hd.set(m.hd as i64);
        self.channel_favorites.set(m.favorites as i64);
        for (kind, count) in &m.by_type {
            self.channels_by_type
                .with_label_values(&[kind])
                .set(*count as i64);
        }
        for status in &m.statuses {
            let tuner = status.tuner.as_deref().unwrap_or("none");
            self.channel_status
                .with_label_values(&[
                    status.id.as_str(),
                    status.name.as_str(),
                    status.number.as_str(),
                    tuner,
                ])
                .set(status.available as i64);
        }
    }
}

struct TunerGauges {
    tuners_total: IntGauge,
    tuners_in_use: IntGauge,
    tuners_available: IntGauge,
    tuners_errored: IntGauge,
    tuner_utilization_percent: Gauge,
    tuner_status: IntGaugeVec, // labels: tuner_id, tuner_name, tuner_type, channel
}

impl TunerGauges {
    fn new(r: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            tuners_total: int_gauge(r, "emby_livetv_tuners_total", "Total number of tuners")?,
            tuners_in_use: int_gauge(r, "emby_livetv_tuners_in_use", "Number of tuners in use")?,
            tuners_available: int_gauge(
                r,
                "emby_livetv_tuners_available",
                "Number of available tuners",
            )?,
            tuners_errored: int_gauge(
                r,
                "emby_livetv_tuners_errored",
                "Number of tuners reporting an error",
            )?,
            tuner_utilization_percent: gauge(
                r,
                "emby_livetv_tuner_utilization_percent",
                "Tuner utilization percentage",
            )?,
            tuner_status: int_gauge_vec(
                r,
                "emby_livetv_tuner_status",
                "Tuner status (1=in use, 0=free)",
                &["tuner_id", "tuner_name", "tuner_type", "channel"],
            )?,
        })
    }

    fn observe(&self, m: &TunerMetrics) {
        self.tuners_total.set(m.total as i64);
        self.tuners_in_use.set(m.in_use as i64);
        self.tuners_available.set(m.available as i64);
        self.tuners_errored.set(m.errored as i64);
        self.tuner_utilization_percent.set(m.utilization_percent);
        for tuner in &m.tuners {
            self.tuner_status
                .with_label_values(&[&tuner.id, &tuner.name, &tuner.kind, &tuner.channel])
                .set(tuner.in_use as i64);
        }
    }
}

struct RecordingGauges {
    active: IntGauge,
    scheduled: IntGauge,
    series: IntGauge,
    conflicts: IntGauge,
    failed: IntGauge,
    storage_gb: Gauge,
    storage_estimate_gb: Gauge,
}

impl RecordingGauges {
    fn new(r: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            active: int_gauge(
                r,
                "emby_livetv_recordings_active",
                "Number of active recordings",
            )?,
            scheduled: int_gauge(
                r,
                "emby_livetv_recordings_scheduled",
                "Number of scheduled recordings",
            )?,
            series: int_gauge(
                r,
                "emby_livetv_recording_series",
                "Number of series recordings scheduled",
            )?,
            conflicts: int_gauge(
                r,
                "emby_livetv_recording_conflicts",
                "Number of recording conflicts",
            )?,
            failed: int_gauge(
                r,
                "emby_livetv_recordings_failed",
                "Number of failed recordings",
            )?,
            storage_gb: gauge(
                r,
                "emby_livetv_recording_storage_gb",
                "Recording storage used in GB",
            )?,
            storage_estimate_gb: gauge(
                r,
                "emby_livetv_recording_storage_estimate_gb",
                "Estimated storage needed by upcoming recordings in GB",
            )?,
        })
    }

    fn observe(&self, m: &RecordingMetrics) {
        self.active.set(m.active as i64);
        self.scheduled.set(m.scheduled as i64);
        self.series.set(m.series as i64);
        self.conflicts.set(m.conflicts as i64);
        self.failed.set(m.failed as i64);
        self.storage_gb.set(m.storage_used_gb);
        self.storage_estimate_gb.set(m.scheduled_storage_estimate_gb);
    }
}

struct GuideGauges {
    programs_today: IntGauge,
    upcoming: IntGauge,
    duration_avg_minutes: Gauge,
    by_genre: IntGaugeVec, // labels: genre
    days_available: IntGauge,
}

impl GuideGauges {
    fn new(r: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            programs_today: int_gauge(
                r,
                "emby_livetv_epg_programs_today",
                "Number of programs today",
            )?,
            upcoming: int_gauge(
                r,
                "emby_livetv_upcoming_programs",
                "Upcoming programs in next hour",
            )?,
            duration_avg_minutes: gauge(
                r,
                "emby_livetv_program_duration_avg_minutes",
                "Average program duration",
            )?,
            by_genre: int_gauge_vec(
                r,
                "emby_livetv_programs_by_genre",
                "Programs by genre",
                &["genre"],
            )?,
            days_available: int_gauge(r, "emby_livetv_epg_days", "Days of EPG data available")?,
        })
    }

    fn observe(&self, m: &GuideMetrics) {
        self.programs_today.set(m.programs_today as i64);
        self.upcoming.set(m.upcoming_next_hour as i64);
        self.duration_avg_minutes.set(m.average_duration_minutes);
        self.days_available.set(m.days_available as i64);
        for (genre, count) in &m.programs_by_genre {
            self.by_genre.with_label_values(&[genre]).set(*count as i64);
        }
    }
}

struct HistoryGauges {
    peak_concurrent_streams: IntGauge,
    hourly_active_users: GaugeVec,         // labels: hour
    channel_switches_total: IntCounterVec, // labels: user
    watch_time_seconds_total: CounterVec,  // labels: user
}

impl HistoryGauges {
    fn new(r: &Registry) -> prometheus::Result<Self> {
        let watch_time_seconds_total = CounterVec::new(
            Opts::new(
                "emby_livetv_user_watch_time_seconds_total",
                "Total watch time per user",
            ),
            &["user"],
        )?;
        r.register(Box::new(watch_time_seconds_total.clone()))?;

        Ok(Self {
            peak_concurrent_streams: int_gauge(
                r,
                "emby_livetv_peak_concurrent_streams",
                "Peak concurrent streams (24h)",
            )?,
            hourly_active_users: gauge_vec(
                r,
                "emby_livetv_hourly_active_users",
                "Active users by hour",
                &["hour"],
            )?,
            channel_switches_total: int_counter_vec(
                r,
                "emby_livetv_channel_switches_total",
                "Channel switch count",
                &["user"],
            )?,
            watch_time_seconds_total,
        })
    }

    fn observe(&self, m: &HistoryMetrics) {
        self.peak_concurrent_streams
            .set(m.peak_concurrent_streams_24h as i64);
        for (hour, value) in m.hourly_active_users.iter().enumerate() {
            self.hourly_active_users
                .with_label_values(&[&hour.to_string()])
                .set(*value);
        }
        // Fresh registry per snapshot: incrementing from zero exposes the running total.
        for (user, activity) in &m.users {
            self.channel_switches_total
                .with_label_values(&[user])
                .inc_by(activity.channel_switches_total);
            self.watch_time_seconds_total
                .with_label_values(&[user])
                .inc_by(activity.watch_seconds_total.max(0.0));
        }
    }
}

/// Self-telemetry of the exporter, accumulated for the process lifetime.
pub struct ExporterTelemetry {
    pub registry: Registry,
    pub api_request_duration: HistogramVec, // labels: endpoint
    pub api_request_errors: IntCounterVec,  // labels: endpoint, kind
    pub cache_requests: IntCounterVec,      // labels: resource, result
    pub cycles_total: IntCounterVec,        // labels: outcome
    pub cycle_duration: Histogram,
}

impl ExporterTelemetry {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let api_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "emby_api_request_duration_seconds",
                "Emby API request duration",
            )
            .buckets(API_LATENCY_BUCKETS.to_vec()),
            &["endpoint"],
        )?;
        registry.register(Box::new(api_request_duration.clone()))?;

        let api_request_errors = int_counter_vec(
            &registry,
            "emby_api_request_errors_total",
            "Total Emby API request errors",
            &["endpoint", "kind"],
        )?;
        let cache_requests = int_counter_vec(
            &registry,
            "emby_exporter_cache_requests_total",
            "Response cache lookups by result (hit/miss)",
            &["resource", "result"],
        )?;
        let cycles_total = int_counter_vec(
            &registry,
            "emby_exporter_refresh_cycles_total",
            "Refresh cycles by outcome",
            &["outcome"],
        )?;

        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "emby_exporter_refresh_duration_seconds",
                "Refresh cycle duration",
            )
            .buckets(CYCLE_DURATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(cycle_duration.clone()))?;

        Ok(Self {
            registry,
            api_request_duration,
            api_request_errors,
            cache_requests,
            cycles_total,
            cycle_duration,
        })
    }

    pub fn encode(&self) -> prometheus::Result<String> {
        encode(&self.registry)
    }
}
