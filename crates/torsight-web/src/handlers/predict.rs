//! Guard ranking.

use axum::{extract::State, Json};
use serde::Deserialize;
use torsight_common::{Observation, ObservationInput};
use torsight_ranker::RankedResult;

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(flatten)]
    pub input: ObservationInput,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub top_k: Option<i64>,
}

/// POST /predict: rank the candidate guards for one exit observation.
pub async fn predict(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<PredictRequest>,
) -> ApiResult<Json<RankedResult>> {
    let observation = Observation::from_input(&request.input)?;
    let PredictRequest { model_id, top_k, .. } = request;
    let ranked = state
        .run(move |engine, deadline| engine.predict(&observation, model_id.as_deref(), top_k, deadline))
        .await?;
    Ok(Json(ranked))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use torsight_ranker::InferenceEngine;

    use crate::handlers::test_support::{app, post, sample_input, send};
    use crate::router::build_router;
    use crate::state::AppState;

    #[tokio::test]
    async fn test_predict_defaults_to_ensemble() {
        let (_fixture, app) = app();
        let (status, body) = post(app, "/predict", sample_input()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_used"], "ensemble");
        assert_eq!(body["entries"].as_array().unwrap().len(), 10);
        assert_eq!(body["degraded"], false);
    }

    #[tokio::test]
    async fn test_predict_single_scorer_and_top_k() {
        let (_fixture, app) = app();
        let mut input = sample_input();
        input["model_id"] = json!("xgboost");
        input["top_k"] = json!(3);
        let (status, body) = post(app, "/predict", input).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_used"], "xgboost");
        assert_eq!(body["entries"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_predict_rejects_invalid_observation() {
        let (_fixture, app) = app();
        let mut input = sample_input();
        input["bandwidth"] = json!(-2.0);
        let (status, body) = post(app, "/predict", input).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "invalid_observation");
        assert_eq!(body["field"], "bandwidth");
    }

    #[tokio::test]
    async fn test_predict_error_statuses() {
        let (_fixture, app) = app();

        let mut input = sample_input();
        input["top_k"] = json!(0);
        let (status, body) = post(app.clone(), "/predict", input).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_top_k");

        let mut input = sample_input();
        input["model_id"] = json!("random_forest");
        let (status, _) = post(app, "/predict", input).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_predict_times_out() {
        let (fixture, _) = app();
        let engine = InferenceEngine::load(&fixture.config).unwrap();
        let app = build_router(AppState::new(engine, Duration::ZERO));
        let request = axum::http::Request::post("/predict")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(sample_input().to_string()))
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["kind"], "deadline_exceeded");
    }
}
