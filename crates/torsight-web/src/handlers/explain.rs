//! Per-guard attribution.

use axum::{extract::State, Json};
use serde::Deserialize;
use torsight_common::{Observation, ObservationInput};
use torsight_features::FeatureVector;
use torsight_ranker::Attribution;

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::SharedState;

/// Either a raw observation or a feature vector built by an earlier call.
#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    #[serde(default)]
    pub input_features: Option<ObservationInput>,
    #[serde(default)]
    pub feature_vector: Option<FeatureVector>,
    /// Kept signed so a negative index reports an unknown candidate rather
    /// than a body error.
    pub guard_index: i64,
    #[serde(default)]
    pub model_id: Option<String>,
}

enum Subject {
    Observation(Observation),
    Vector(FeatureVector),
}

/// POST /explain
pub async fn explain(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<ExplainRequest>,
) -> ApiResult<Json<Attribution>> {
    let guard = u32::try_from(request.guard_index)
        .map_err(|_| ApiError::UnknownGuardIndex(request.guard_index))?;
    let subject = match (request.input_features, request.feature_vector) {
        (Some(input), None) => Subject::Observation(Observation::from_input(&input)?),
        (None, Some(vector)) => Subject::Vector(vector),
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of input_features or feature_vector is required".into(),
            ))
        }
    };
    let model_id = request.model_id;

    let attribution = state
        .run(move |engine, deadline| match &subject {
            Subject::Observation(obs) => engine.explain(obs, guard, model_id.as_deref(), deadline),
            Subject::Vector(vector) => engine.explain_vector(vector, guard, model_id.as_deref(), deadline),
        })
        .await?;
    Ok(Json(attribution))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use torsight_features::FeatureTransformer;
    use torsight_test_utils::{reference_data, sample_observation};

    use crate::handlers::test_support::{app, post, sample_input, send};

    #[tokio::test]
    async fn test_explain_observation() {
        let (_fixture, app) = app();
        let request = json!({
            "input_features": sample_input(),
            "guard_index": 4,
            "model_id": "lightgbm",
        });
        let (status, body) = post(app, "/explain", request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["guard_index"], 4);
        assert_eq!(body["model_used"], "lightgbm");
        assert_eq!(body["top_features"].as_array().unwrap().len(), 10);
        assert!(body["rationale"].as_str().unwrap().starts_with("Guard_004"));
    }

    #[tokio::test]
    async fn test_explain_feature_vector_matches_observation() {
        let (_fixture, app) = app();
        let vector = FeatureTransformer::new(reference_data())
            .transform(&sample_observation())
            .unwrap();
        let (_, from_vector) = post(
            app.clone(),
            "/explain",
            json!({ "feature_vector": vector, "guard_index": 2 }),
        )
        .await;
        let (_, from_input) = post(
            app,
            "/explain",
            json!({ "input_features": sample_input(), "guard_index": 2 }),
        )
        .await;
        assert_eq!(from_vector["guard_index"], from_input["guard_index"]);
        assert_eq!(from_vector["top_features"][0]["feature"], from_input["top_features"][0]["feature"]);
        let gap = from_vector["score"].as_f64().unwrap() - from_input["score"].as_f64().unwrap();
        assert!(gap.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_explain_rejects_bad_requests() {
        let (_fixture, app) = app();

        let (status, _) = post(app.clone(), "/explain", json!({ "guard_index": 1 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(
            app,
            "/explain",
            json!({ "input_features": sample_input(), "guard_index": 999 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "unknown_candidate");
    }

    #[tokio::test]
    async fn test_explain_negative_guard_is_unknown_candidate() {
        let (_fixture, app) = app();
        let (status, body) = post(
            app,
            "/explain",
            json!({ "input_features": sample_input(), "guard_index": -1 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "unknown_candidate");
        assert!(body["error"].as_str().unwrap().contains("-1"));
    }

    #[tokio::test]
    async fn test_malformed_body_gets_structured_error() {
        let (_fixture, app) = app();
        let (status, body) = post(
            app.clone(),
            "/explain",
            json!({ "input_features": sample_input(), "guard_index": "first" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "invalid_body");
        assert!(body["error"].is_string());

        let request = axum::http::Request::post("/predict")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{not json"))
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_body");
    }
}
