//! Torsight web server
//!
//! Run with: cargo run -p torsight-web

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use torsight_config::EngineConfig;
use torsight_ranker::InferenceEngine;
use torsight_web::{router::build_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::load()?;
    info!("Starting torsight web server...");

    let engine = tokio::task::spawn_blocking({
        let config = config.clone();
        move || InferenceEngine::load(&config)
    })
    .await??;

    let health = engine.health();
    info!(
        status = health.status,
        models_loaded = health.models_loaded,
        candidates = health.candidate_count,
        "Inference engine ready"
    );

    let state = AppState::new(engine, Duration::from_millis(config.server.request_timeout_ms));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
