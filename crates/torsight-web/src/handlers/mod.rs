//! HTTP handlers for all routes.

pub mod counterfactual;
pub mod explain;
pub mod health;
pub mod models;
pub mod predict;

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use torsight_ranker::InferenceEngine;
    use torsight_test_utils::Fixture;
    use tower::ServiceExt;

    use crate::router::build_router;
    use crate::state::AppState;

    pub fn app_for(fixture: &Fixture) -> Router {
        let engine = InferenceEngine::load(&fixture.config).unwrap();
        build_router(AppState::new(engine, Duration::from_secs(30)))
    }

    pub fn app() -> (Fixture, Router) {
        let fixture = Fixture::new().unwrap();
        let app = app_for(&fixture);
        (fixture, app)
    }

    pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        send(app, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, request).await
    }

    pub fn sample_input() -> Value {
        serde_json::json!({
            "exit_ip": "45.33.32.156",
            "exit_country": "DE",
            "bandwidth": 7.5,
            "circuit_setup_duration": 2.0,
            "total_bytes": 500000
        })
    }
}
