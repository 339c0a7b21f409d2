//! HTTP client for the Emby REST API.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::wire::{
    ChannelDto, ItemsResponse, ProgramDto, RecordingDto, SessionDto, SystemInfoDto, TimerDto,
    TunerDto,
};
use super::{MediaServer, Resource};
use crate::error::ApiError;
use crate::metrics::ExporterTelemetry;
use crate::model::{Channel, Program, Recording, ServerInfo, Session, Timer, Tuner};

/// Upper bound on guide entries requested per cycle.
const GUIDE_PAGE_LIMIT: u32 = 1000;

/// Retry behaviour for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with up to 50% jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = (exp.as_millis() as u64) / 2;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        (exp + jitter).min(self.max_delay)
    }

    /// Worst-case time spent waiting between attempts.
    pub fn total_backoff(&self) -> Duration {
        self.max_delay.saturating_mul(self.max_retries)
    }
}

/// Connection settings for [`EmbyClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Authenticated Emby API client.
pub struct EmbyClient {
    http: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    telemetry: Arc<ExporterTelemetry>,
}

impl EmbyClient {
    pub fn new(
        options: ClientOptions,
        telemetry: Arc<ExporterTelemetry>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.request_timeout)
            .user_agent(concat!("livetv-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            api_key: options.api_key,
            retry: options.retry,
            telemetry,
        })
    }

    /// GETs a resource and decodes it, retrying transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let mut attempt = 0;
        loop {
            let result = self.attempt::<T>(resource, query).await;
            match result {
                Err(ref e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    debug!(
                        "Retrying {} in {:?} (attempt {}/{}): {}",
                        resource.path(),
                        delay,
                        attempt,
                        self.retry.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let endpoint = resource.path();
        let url = format!("{}{}", self.base_url, endpoint);
        let start = Instant::now();

        let result = self.send(&url, endpoint, query).await;

        self.telemetry
            .api_request_duration
            .with_label_values(&[endpoint])
            .observe(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            self.telemetry
                .api_request_errors
                .with_label_values(&[endpoint, e.kind()])
                .inc();
        }
        result
    }

    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(url)
            .header("X-Emby-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Transient {
                endpoint: endpoint.to_string(),
                message: describe_transport_error(&e),
            })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ApiError::Auth {
                    endpoint: endpoint.to_string(),
                    status: status.as_u16(),
                });
            }
            StatusCode::NOT_FOUND => {
                return Err(ApiError::Malformed {
                    endpoint: endpoint.to_string(),
                    message: "endpoint not available on this server".into(),
                });
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                return Err(ApiError::Transient {
                    endpoint: endpoint.to_string(),
                    message: format!("HTTP {}", s.as_u16()),
                });
            }
            s if !s.is_success() => {
                return Err(ApiError::Malformed {
                    endpoint: endpoint.to_string(),
                    message: format!("unexpected HTTP {}", s.as_u16()),
                });
            }
            _ => {}
        }

        let body = response.bytes().await.map_err(|e| ApiError::Transient {
            endpoint: endpoint.to_string(),
            message: describe_transport_error(&e),
        })?;

        serde_json::from_slice(&body).map_err(|e| {
            warn!("Unexpected response shape from {}: {}", endpoint, e);
            ApiError::Malformed {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        })
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timeout: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

#[async_trait]
impl MediaServer for EmbyClient {
    #[instrument(skip(self))]
    async fn server_info(&self) -> Result<ServerInfo, ApiError> {
        let dto: SystemInfoDto = self.get_json(Resource::ServerInfo, &[]).await?;
        Ok(dto.into())
    }

    #[instrument(skip(self))]
    async fn sessions(&self) -> Result<Vec<Session>, ApiError> {
        let dtos: Vec<SessionDto> = self.get_json(Resource::Sessions, &[]).await?;
        Ok(dtos
            .into_iter()
            .filter_map(SessionDto::into_live_tv_session)
            .collect())
    }

    #[instrument(skip(self))]
    async fn channels(&self) -> Result<Vec<Channel>, ApiError> {
        let page: ItemsResponse<ChannelDto> = self
            .get_json(Resource::Channels, &[("EnableUserData", "true".to_string())])
            .await?;
        Ok(page.items.into_iter().map(Channel::from).collect())
    }

    #[instrument(skip(self))]
    async fn tuners(&self) -> Result<Vec<Tuner>, ApiError> {
        let dtos: Vec<TunerDto> = self.get_json(Resource::Tuners, &[]).await?;
        Ok(dtos.into_iter().map(Tuner::from).collect())
    }

    #[instrument(skip(self))]
    async fn timers(&self) -> Result<Vec<Timer>, ApiError> {
        let page: ItemsResponse<TimerDto> = self.get_json(Resource::Timers, &[]).await?;
        Ok(page.items.into_iter().map(Timer::from).collect())
    }

    #[instrument(skip(self))]
    async fn recordings(&self) -> Result<Vec<Recording>, ApiError> {
        let page: ItemsResponse<RecordingDto> =
            self.get_json(Resource::Recordings, &[]).await?;
        Ok(page.items.into_iter().map(Recording::from).collect())
    }

    #[instrument(skip(self))]
    async fn programs(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Program>, ApiError> {
        let query = [
            ("MinStartDate", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("MaxStartDate", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("Limit", GUIDE_PAGE_LIMIT.to_string()),
        ];
        let page: ItemsResponse<ProgramDto> = self.get_json(Resource::Guide, &query).await?;
        Ok(page.items.into_iter().map(Program::from).collect())
    }

    async fn has_programs(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<bool, ApiError> {
        let query = [
            ("MinStartDate", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("MaxStartDate", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("Limit", "1".to_string()),
        ];
        let page: ItemsResponse<ProgramDto> = self.get_json(Resource::Guide, &query).await?;
        Ok(!page.items.is_empty() || page.total_record_count.unwrap_or(0) > 0)
    }
}
