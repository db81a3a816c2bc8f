//! What-if analysis over raw observation fields.

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Deserialize;
use torsight_common::{Observation, ObservationInput, ObservationOverrides, RawField};
use torsight_ranker::{CounterfactualReport, CriticalThresholds};

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct CounterfactualRequest {
    pub original_input: ObservationInput,
    #[serde(default)]
    pub modified_features: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub top_k: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    pub original_input: ObservationInput,
    pub feature: String,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// POST /counterfactual
pub async fn counterfactual(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<CounterfactualRequest>,
) -> ApiResult<Json<CounterfactualReport>> {
    let original = Observation::from_input(&request.original_input)?;
    let overrides = ObservationOverrides::from_map(&request.modified_features)?;
    let CounterfactualRequest { model_id, top_k, .. } = request;

    let report = state
        .run(move |engine, deadline| {
            engine.counterfactual(&original, &overrides, model_id.as_deref(), top_k, deadline)
        })
        .await?;
    Ok(Json(report))
}

/// POST /counterfactual/threshold: smallest single-field change that
/// replaces the top guard.
pub async fn critical_threshold(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<ThresholdRequest>,
) -> ApiResult<Json<CriticalThresholds>> {
    let original = Observation::from_input(&request.original_input)?;
    let field: RawField = request.feature.parse()?;
    let model_id = request.model_id;

    let thresholds = state
        .run(move |engine, deadline| engine.critical_threshold(&original, field, model_id.as_deref(), deadline))
        .await?;
    Ok(Json(thresholds))
}
