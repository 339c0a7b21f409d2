//! Upstream media server API.
//!
//! The [`MediaServer`] trait is the seam between the engine and the network:
//! production code uses [`EmbyClient`], tests inject fakes.

pub mod client;
pub mod wire;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::ApiError;
use crate::model::{Channel, Program, Recording, ServerInfo, Session, Timer, Tuner};

pub use client::EmbyClient;

/// Resource types polled from the media server. Also the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    ServerInfo,
    Sessions,
    Channels,
    Tuners,
    Timers,
    Recordings,
    Guide,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::ServerInfo,
        Resource::Sessions,
        Resource::Channels,
        Resource::Tuners,
        Resource::Timers,
        Resource::Recordings,
        Resource::Guide,
    ];

    /// Upstream path, also used as the `endpoint` label.
    pub fn path(&self) -> &'static str {
        match self {
            Resource::ServerInfo => "/System/Info",
            Resource::Sessions => "/Sessions",
            Resource::Channels => "/LiveTv/Channels",
            Resource::Tuners => "/LiveTv/Tuners",
            Resource::Timers => "/LiveTv/Timers",
            Resource::Recordings => "/LiveTv/Recordings",
            Resource::Guide => "/LiveTv/Programs",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Resource::ServerInfo => "server_info",
            Resource::Sessions => "sessions",
            Resource::Channels => "channels",
            Resource::Tuners => "tuners",
            Resource::Timers => "timers",
            Resource::Recordings => "recordings",
            Resource::Guide => "guide",
        }
    }

    pub fn from_name(name: &str) -> Option<Resource> {
        Resource::ALL.into_iter().find(|r| r.name() == name)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Read-only access to the Live TV subsystem of a media server.
#[async_trait]
pub trait MediaServer: Send + Sync + 'static {
    async fn server_info(&self) -> Result<ServerInfo, ApiError>;

    /// Active Live TV sessions only; other playback is filtered out.
    async fn sessions(&self) -> Result<Vec<Session>, ApiError>;

    async fn channels(&self) -> Result<Vec<Channel>, ApiError>;

    async fn tuners(&self) -> Result<Vec<Tuner>, ApiError>;

    async fn timers(&self) -> Result<Vec<Timer>, ApiError>;

    async fn recordings(&self) -> Result<Vec<Recording>, ApiError>;

    /// Guide entries starting inside `[from, to)`.
    async fn programs(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Program>, ApiError>;

    /// Whether any guide entry starts inside `[from, to)`.
    async fn has_programs(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<bool, ApiError> {
        Ok(!self.programs(from, to).await?.is_empty())
    }
}
