//! HTTP mapping of engine errors.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use torsight_common::TorsightError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] TorsightError),

    #[error("Request exceeded the {0} ms timeout")]
    Timeout(u64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid request body: {message}")]
    InvalidBody { status: StatusCode, message: String },

    #[error("Unknown guard candidate: {0}")]
    UnknownGuardIndex(i64),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                TorsightError::InvalidObservation { .. } | TorsightError::InvalidOverride { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                TorsightError::InvalidTopK { .. } | TorsightError::InvalidFeatureVector(_) => {
                    StatusCode::BAD_REQUEST
                }
                TorsightError::UnknownCandidate(_) | TorsightError::UnknownScorer(_) => StatusCode::NOT_FOUND,
                TorsightError::ScorerUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                TorsightError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidBody { status, .. } => *status,
            ApiError::UnknownGuardIndex(_) => StatusCode::NOT_FOUND,
            ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Engine(e) => e.kind(),
            ApiError::Timeout(_) => "deadline_exceeded",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InvalidBody { .. } => "invalid_body",
            ApiError::UnknownGuardIndex(_) => "unknown_candidate",
            ApiError::Worker(_) => "internal",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let ApiError::Engine(e) = &self {
            if let Some(field) = e.field() {
                body["field"] = json!(field);
            }
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(TorsightError::invalid_observation("bandwidth", "must be > 0")), 422),
            (ApiError::from(TorsightError::InvalidTopK { requested: 0, max: 50 }), 400),
            (ApiError::from(TorsightError::UnknownCandidate(99)), 404),
            (ApiError::from(TorsightError::UnknownScorer("svm".into())), 404),
            (
                ApiError::from(TorsightError::ScorerUnavailable { scorer: "xgboost".into(), reason: "missing".into() }),
                503,
            ),
            (ApiError::from(TorsightError::DeadlineExceeded { stage: "score" }), 504),
            (ApiError::from(TorsightError::internal("catboost", "nan")), 500),
            (ApiError::Timeout(5000), 504),
            (ApiError::UnknownGuardIndex(-1), 404),
        ];
        for (error, status) in cases {
            assert_eq!(error.status().as_u16(), status, "{error}");
        }
    }

    #[test]
    fn test_kind_passes_through() {
        let error = ApiError::from(TorsightError::invalid_override("bandwidth", "negative"));
        assert_eq!(error.kind(), "invalid_override");
        assert_eq!(ApiError::Timeout(1).kind(), "deadline_exceeded");
        assert_eq!(ApiError::UnknownGuardIndex(-1).kind(), "unknown_candidate");
    }
}
