mod analysis;
mod batch;
mod config;
mod errors;
mod extraction;
mod llm_client;
mod models;
mod report;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::LlmAnalysisClient;
use crate::batch::registry::BatchRegistry;
use crate::batch::BatchScheduler;
use crate::config::Config;
use crate::extraction::FileExtractor;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

/// Upper bound on the gap between retention sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting analyzer API v{}", env!("CARGO_PKG_VERSION"));

    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let scheduler = BatchScheduler::new(
        Arc::new(FileExtractor::new(config.max_file_size_mb)),
        Arc::new(LlmAnalysisClient::new(llm)),
    );
    info!(defaults = ?config.batch_defaults, "Batch scheduler ready");

    let registry = BatchRegistry::new(config.batch_retention);
    registry.spawn_sweeper(config.batch_retention.min(MAX_SWEEP_INTERVAL));
    info!(
        retention_hours = config.batch_retention.as_secs() / 3600,
        "Batch retention sweeper started"
    );

    let state = AppState {
        config: config.clone(),
        scheduler,
        registry,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
