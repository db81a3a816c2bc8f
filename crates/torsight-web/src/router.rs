//! Axum router: maps URL paths to handlers.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{
    counterfactual::{counterfactual, critical_threshold},
    explain::explain,
    health::health,
    models::{feature_importance, list_models},
    predict::predict,
};
use crate::state::{AppState, SharedState};

/// Build and return the full Axum router.
pub fn build_router(state: AppState) -> Router {
    let shared: SharedState = Arc::new(state);

    Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models))
        .route("/feature-importance/{model_id}", get(feature_importance))
        .route("/predict", post(predict))
        .route("/explain", post(explain))
        .route("/counterfactual", post(counterfactual))
        .route("/counterfactual/threshold", post(critical_threshold))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}
