//! Error types for the exporter.
//!
//! Upstream failures are classified so the engine can decide per resource
//! whether to retry, treat the resource as empty, or mark it stale.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single upstream API request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Bad or expired token. Never retried.
    #[error("Authentication failed for {endpoint}: HTTP {status}")]
    Auth { endpoint: String, status: u16 },

    /// Timeout, connection refused or a server-side failure. Retried with backoff.
    #[error("Transient failure for {endpoint}: {message}")]
    Transient { endpoint: String, message: String },

    /// The response did not have the expected shape.
    #[error("Malformed response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },
}

impl ApiError {
    /// Short label used for the error-kind metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Auth { .. } => "auth",
            ApiError::Transient { .. } => "transient",
            ApiError::Malformed { .. } => "malformed",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }
}

/// Failure of a whole refresh cycle.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Refresh cycle exceeded its timeout of {0:?}")]
    Timeout(Duration),

    #[error("Failed to render metrics snapshot: {0}")]
    Render(#[from] prometheus::Error),
}

/// Invalid effective configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
