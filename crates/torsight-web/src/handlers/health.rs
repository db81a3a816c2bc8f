//! Liveness and model status.

use axum::{extract::State, Json};
use torsight_ranker::EngineHealth;

use crate::state::SharedState;

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<EngineHealth> {
    Json(state.engine.health())
}
