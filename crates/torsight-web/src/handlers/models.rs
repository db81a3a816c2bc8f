//! Model listing and global feature importance.

use axum::{
    extract::{Path, State},
    Json,
};
use torsight_ranker::{FeatureImportanceReport, ModelList};

use crate::error::ApiResult;
use crate::state::SharedState;

/// GET /models
pub async fn list_models(State(state): State<SharedState>) -> Json<ModelList> {
    Json(state.engine.list_models())
}

/// GET /feature-importance/{model_id}
pub async fn feature_importance(
    State(state): State<SharedState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<FeatureImportanceReport>> {
    let report = state.engine.feature_importance(&model_id)?;
    Ok(Json(report))
}
