//! Configuration display endpoint handler.

use axum::{extract::State, Json};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::state::SharedState;

/// Handler for the /config endpoint. The API key never leaves the process.
#[instrument(skip(state))]
pub async fn config_handler(State(state): State<SharedState>) -> Json<Config> {
    debug!("Processing /config request");
    Json(state.config.redacted())
}
