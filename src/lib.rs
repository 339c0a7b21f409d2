//! Emby Live TV Prometheus exporter.
//!
//! A background [`scheduler::Scheduler`] polls the Emby REST API on a fixed
//! interval, folds each cycle into an immutable [`snapshot::Snapshot`] and
//! publishes it to the [`registry::MetricsRegistry`]. The `/metrics` endpoint
//! only ever reads the published snapshot.
//!
//! ```text
//! MediaServer ─► Fetcher (TtlCache) ─► aggregate ─► Snapshot ─► MetricsRegistry ─► /metrics
//!                                        ▲
//!                                   StateStore (peak, hourly, users)
//! ```
//!
//! Cycles can be driven directly with [`collector::Collector::run_cycle`] or
//! [`scheduler::Scheduler::tick`], which is how the tests exercise it against a
//! fake [`api::MediaServer`].

pub mod activity;
pub mod aggregation;
pub mod api;
pub mod cache;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod hourly;
pub mod metrics;
pub mod model;
pub mod peak;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod store;

pub use api::{EmbyClient, MediaServer, Resource};
pub use collector::Collector;
pub use registry::{MetricsRegistry, RegistryState};
pub use scheduler::{CycleOutcome, Scheduler};
pub use snapshot::Snapshot;
