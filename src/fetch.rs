//! Per-cycle resource fetching through the TTL caches.
//!
//! Every resource is fetched concurrently. Transient and auth failures are
//! returned per resource so the aggregation engine can mark only the affected
//! groups stale. Malformed responses are treated as an empty result for this
//! cycle; they are not cached, so the next cycle asks again.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::{MediaServer, Resource};
use crate::cache::TtlCache;
use crate::error::ApiError;
use crate::metrics::ExporterTelemetry;
use crate::model::{Channel, Program, Recording, ServerInfo, Session, Timer, Tuner};

/// Sessions and tuners change by the second; keep them short-lived.
pub const DEFAULT_VOLATILE_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_GUIDE_TTL: Duration = Duration::from_secs(300);

/// Furthest day ahead probed for guide data.
pub const MAX_GUIDE_DAYS: u32 = 14;

/// Cache lifetime per resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTtls {
    pub server_info: Duration,
    pub sessions: Duration,
    pub channels: Duration,
    pub tuners: Duration,
    pub timers: Duration,
    pub recordings: Duration,
    pub guide: Duration,
}

impl CacheTtls {
    /// Slow-changing resources use `base`; sessions, tuners and the guide keep their own defaults.
    pub fn from_base(base: Duration) -> Self {
        Self {
            server_info: base,
            sessions: DEFAULT_VOLATILE_TTL.min(base),
            channels: base,
            tuners: DEFAULT_VOLATILE_TTL.min(base),
            timers: base,
            recordings: base,
            guide: DEFAULT_GUIDE_TTL.max(base),
        }
    }

    pub fn get(&self, resource: Resource) -> Duration {
        match resource {
            Resource::ServerInfo => self.server_info,
            Resource::Sessions => self.sessions,
            Resource::Channels => self.channels,
            Resource::Tuners => self.tuners,
            Resource::Timers => self.timers,
            Resource::Recordings => self.recordings,
            Resource::Guide => self.guide,
        }
    }

    pub fn set(&mut self, resource: Resource, ttl: Duration) {
        let slot = match resource {
            Resource::ServerInfo => &mut self.server_info,
            Resource::Sessions => &mut self.sessions,
            Resource::Channels => &mut self.channels,
            Resource::Tuners => &mut self.tuners,
            Resource::Timers => &mut self.timers,
            Resource::Recordings => &mut self.recordings,
            Resource::Guide => &mut self.guide,
        };
        *slot = ttl;
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::from_base(Duration::from_secs(crate::config::DEFAULT_CACHE_TTL))
    }
}

/// Time range the guide is fetched for, in UTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideWindow {
    /// Local midnight of the current day.
    pub day_start: DateTime<Utc>,
    /// Next local midnight.
    pub day_end: DateTime<Utc>,
    /// End of the fetch range: the later of `day_end` and one hour from now.
    pub fetch_end: DateTime<Utc>,
    pub day: NaiveDate,
}

impl GuideWindow {
    pub fn around(now: DateTime<Utc>) -> Self {
        let day = now.with_timezone(&Local).date_naive();
        let day_start = local_midnight(day).unwrap_or(now);
        let day_end = day
            .succ_opt()
            .and_then(local_midnight)
            .unwrap_or(day_start + ChronoDuration::days(1));
        let fetch_end = day_end.max(now + ChronoDuration::hours(1));
        Self {
            day_start,
            day_end,
            fetch_end,
            day,
        }
    }
}

fn local_midnight(day: NaiveDate) -> Option<DateTime<Utc>> {
    let naive = day.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Everything one refresh cycle fetched, one result per resource.
#[derive(Debug, Clone)]
pub struct CycleInput {
    /// `Ok(None)` when the server answered but the payload was unusable.
    pub server: Result<Option<Arc<ServerInfo>>, ApiError>,
    pub sessions: Result<Arc<Vec<Session>>, ApiError>,
    pub channels: Result<Arc<Vec<Channel>>, ApiError>,
    pub tuners: Result<Arc<Vec<Tuner>>, ApiError>,
    pub timers: Result<Arc<Vec<Timer>>, ApiError>,
    pub recordings: Result<Arc<Vec<Recording>>, ApiError>,
    /// `None` when guide collection is disabled.
    pub programs: Option<Result<Arc<Vec<Program>>, ApiError>>,
    /// Consecutive days after today with guide data, `None` when guide collection is disabled.
    pub guide_days: Option<Result<u32, ApiError>>,
    pub guide_window: GuideWindow,
    /// Requests went out this cycle and every one of them failed transiently.
    /// Cache hits do not count as contact with the server.
    pub unreachable: bool,
}

impl CycleInput {
    /// All failures of this cycle, tagged with their resource.
    pub fn errors(&self) -> Vec<(Resource, &ApiError)> {
        let mut out = Vec::new();
        if let Err(e) = &self.server {
            out.push((Resource::ServerInfo, e));
        }
        if let Err(e) = &self.sessions {
            out.push((Resource::Sessions, e));
        }
        if let Err(e) = &self.channels {
            out.push((Resource::Channels, e));
        }
        if let Err(e) = &self.tuners {
            out.push((Resource::Tuners, e));
        }
        if let Err(e) = &self.timers {
            out.push((Resource::Timers, e));
        }
        if let Err(e) = &self.recordings {
            out.push((Resource::Recordings, e));
        }
        if let Some(Err(e)) = &self.programs {
            out.push((Resource::Guide, e));
        }
        if let Some(Err(e)) = &self.guide_days {
            out.push((Resource::Guide, e));
        }
        out
    }

    pub fn has_auth_failure(&self) -> bool {
        self.errors().iter().any(|(_, e)| e.is_auth())
    }
}

/// Tracks whether the server answered any request sent during one cycle.
#[derive(Debug, Default)]
struct Reachability {
    answered: AtomicBool,
    refused: AtomicBool,
}

impl Reachability {
    fn record<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        match &result {
            Err(e) if e.is_transient() => self.refused.store(true, Ordering::Relaxed),
            _ => self.answered.store(true, Ordering::Relaxed),
        }
        result
    }

    fn unreachable(&self) -> bool {
        self.refused.load(Ordering::Relaxed) && !self.answered.load(Ordering::Relaxed)
    }
}

/// Resource fetcher with one TTL cache per resource type.
pub struct Fetcher<S: MediaServer> {
    server: Arc<S>,
    ttls: CacheTtls,
    server_info: TtlCache<Resource, Arc<ServerInfo>>,
    sessions: TtlCache<Resource, Arc<Vec<Session>>>,
    channels: TtlCache<Resource, Arc<Vec<Channel>>>,
    tuners: TtlCache<Resource, Arc<Vec<Tuner>>>,
    timers: TtlCache<Resource, Arc<Vec<Timer>>>,
    recordings: TtlCache<Resource, Arc<Vec<Recording>>>,
    guide: TtlCache<NaiveDate, Arc<Vec<Program>>>,
    guide_days: TtlCache<NaiveDate, u32>,
}

fn counted_cache<K, V>(telemetry: &ExporterTelemetry, resource: Resource) -> TtlCache<K, V>
where
    K: Eq + std::hash::Hash + Clone,
    V: Clone,
{
    let counter = |result: &str| {
        telemetry
            .cache_requests
            .with_label_values(&[resource.name(), result])
    };
    TtlCache::with_counters(counter("hit"), counter("miss"))
}

impl<S: MediaServer> Fetcher<S> {
    pub fn new(server: Arc<S>, ttls: CacheTtls, telemetry: &ExporterTelemetry) -> Self {
        Self {
            server,
            ttls,
            server_info: counted_cache(telemetry, Resource::ServerInfo),
            sessions: counted_cache(telemetry, Resource::Sessions),
            channels: counted_cache(telemetry, Resource::Channels),
            tuners: counted_cache(telemetry, Resource::Tuners),
            timers: counted_cache(telemetry, Resource::Timers),
            recordings: counted_cache(telemetry, Resource::Recordings),
            guide: counted_cache(telemetry, Resource::Guide),
            guide_days: TtlCache::new(),
        }
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// Fetches every resource concurrently.
    pub async fn fetch_all(&self, now: DateTime<Utc>, include_guide: bool) -> CycleInput {
        let window = GuideWindow::around(now);
        let api = &self.server;
        let reach = Reachability::default();
        let reach = &reach;

        let server_fut = async {
            let result = self
                .server_info
                .get_or_fetch(Resource::ServerInfo, self.ttls.server_info, move || async move {
                    reach.record(api.server_info().await).map(Arc::new)
                })
                .await;
            match result {
                Ok(info) => Ok(Some(info)),
                Err(e @ ApiError::Malformed { .. }) => {
                    warn!("Server info unusable, continuing without it: {}", e);
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        };

        let ttls = &self.ttls;
        let sessions_fut = cached_list(&self.sessions, Resource::Sessions, ttls, move || async move {
            reach.record(api.sessions().await).map(Arc::new)
        });
        let channels_fut = cached_list(&self.channels, Resource::Channels, ttls, move || async move {
            reach.record(api.channels().await).map(Arc::new)
        });
        let tuners_fut = cached_list(&self.tuners, Resource::Tuners, ttls, move || async move {
            reach.record(api.tuners().await).map(Arc::new)
        });
        let timers_fut = cached_list(&self.timers, Resource::Timers, ttls, move || async move {
            reach.record(api.timers().await).map(Arc::new)
        });
        let recordings_fut = cached_list(&self.recordings, Resource::Recordings, ttls, move || async move {
            reach.record(api.recordings().await).map(Arc::new)
        });
        let guide_fut = async {
            if !include_guide {
                return None;
            }
            let result = self
                .guide
                .get_or_fetch(window.day, self.ttls.guide, move || async move {
                    reach
                        .record(api.programs(window.day_start, window.fetch_end).await)
                        .map(Arc::new)
                })
                .await;
            Some(empty_on_malformed(Resource::Guide, result))
        };
        let guide_days_fut = async {
            if !include_guide {
                return None;
            }
            let result = self
                .guide_days
                .get_or_fetch(window.day, self.ttls.guide, move || async move {
                    reach.record(guide_days(api.as_ref(), window.day_start).await)
                })
                .await;
            Some(match result {
                Err(e @ ApiError::Malformed { .. }) => {
                    warn!("Guide coverage unknown for this cycle: {}", e);
                    Ok(0)
                }
                other => other,
            })
        };

        let (server, sessions, channels, tuners, timers, recordings, programs, coverage) = tokio::join!(
            server_fut,
            sessions_fut,
            channels_fut,
            tuners_fut,
            timers_fut,
            recordings_fut,
            guide_fut,
            guide_days_fut
        );

        let input = CycleInput {
            server,
            sessions,
            channels,
            tuners,
            timers,
            recordings,
            programs,
            guide_days: coverage,
            guide_window: window,
            unreachable: reach.unreachable(),
        };
        for (resource, error) in input.errors() {
            debug!("Fetch of {} failed: {}", resource, error);
        }
        input
    }
}

/// Counts the days after `day_start` whose first hour has guide entries,
/// stopping at the first empty day.
pub async fn guide_days<S: MediaServer>(
    server: &S,
    day_start: DateTime<Utc>,
) -> Result<u32, ApiError> {
    for days in 1..=MAX_GUIDE_DAYS {
        let from = day_start + ChronoDuration::days(days as i64);
        if !server.has_programs(from, from + ChronoDuration::hours(1)).await? {
            return Ok(days - 1);
        }
    }
    Ok(MAX_GUIDE_DAYS)
}

async fn cached_list<T, F, Fut>(
    cache: &TtlCache<Resource, Arc<Vec<T>>>,
    resource: Resource,
    ttls: &CacheTtls,
    fetch: F,
) -> Result<Arc<Vec<T>>, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<Vec<T>>, ApiError>>,
{
    let result = cache.get_or_fetch(resource, ttls.get(resource), fetch).await;
    empty_on_malformed(resource, result)
}

fn empty_on_malformed<T>(
    resource: Resource,
    result: Result<Arc<Vec<T>>, ApiError>,
) -> Result<Arc<Vec<T>>, ApiError> {
    match result {
        Err(e @ ApiError::Malformed { .. }) => {
            warn!("Treating {} as empty for this cycle: {}", resource, e);
            Ok(Arc::new(Vec::new()))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_ttls_from_base() {
        let ttls = CacheTtls::from_base(Duration::from_secs(60));
        assert_eq!(ttls.get(Resource::Channels), Duration::from_secs(60));
        assert_eq!(ttls.get(Resource::Sessions), Duration::from_secs(10));
        assert_eq!(ttls.get(Resource::Guide), Duration::from_secs(300));

        let short = CacheTtls::from_base(Duration::from_secs(5));
        assert_eq!(short.get(Resource::Tuners), Duration::from_secs(5));
    }

    #[test]
    fn test_ttl_override() {
        let mut ttls = CacheTtls::default();
        ttls.set(Resource::Timers, Duration::from_secs(120));
        assert_eq!(ttls.timers, Duration::from_secs(120));
    }

    #[test]
    fn test_guide_window_covers_rest_of_day_and_next_hour() {
        let now = Utc::now();
        let window = GuideWindow::around(now);
        assert!(window.day_start <= now);
        assert!(window.day_end > now);
        assert!(window.fetch_end >= now + ChronoDuration::hours(1));
        assert!(window.fetch_end >= window.day_end);

        let local_start = window.day_start.with_timezone(&Local);
        assert_eq!(local_start.hour(), 0);
        assert_eq!(local_start.date_naive(), window.day);
    }
}
