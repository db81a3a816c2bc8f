//! Shared application state for the web server.

use std::sync::Arc;
use std::time::Duration;

use torsight_common::Deadline;
use torsight_ranker::InferenceEngine;

use crate::error::{ApiError, ApiResult};

/// Shared state injected into every Axum handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(engine: InferenceEngine, request_timeout: Duration) -> Self {
        Self {
            engine: Arc::new(engine),
            request_timeout,
        }
    }

    /// Run a synchronous engine call on the blocking pool under the request
    /// timeout. The engine sees the same deadline, so a timed-out call is
    /// cancelled at its next stage boundary instead of running on.
    pub async fn run<T, F>(&self, call: F) -> ApiResult<T>
    where
        F: FnOnce(&InferenceEngine, &Deadline) -> torsight_common::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Deadline::after(self.request_timeout);
        let engine = self.engine.clone();
        let worker_deadline = deadline.clone();
        let task = tokio::task::spawn_blocking(move || call(&engine, &worker_deadline));

        match tokio::time::timeout(self.request_timeout, task).await {
            Ok(Ok(result)) => result.map_err(ApiError::from),
            Ok(Err(join)) => Err(ApiError::Worker(join.to_string())),
            Err(_) => {
                deadline.cancel();
                Err(ApiError::Timeout(self.request_timeout.as_millis() as u64))
            }
        }
    }
}

pub type SharedState = Arc<AppState>;
