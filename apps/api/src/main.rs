mod cache;
mod config;
mod db;
mod errors;
mod llm_client;
mod matching;
mod models;
mod routes;
mod sources;
mod state;
#[cfg(test)]
mod testing;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::PgMatchStore;
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::{ChatModel, LlmClient};
use crate::matching::ai_scorer::AiScorer;
use crate::matching::orchestrator::MatchingService;
use crate::routes::build_router;
use crate::sources::{FileSampleSource, PgJobDescriptionSource, RedisSessionStore};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Match API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (migrations applied on connect)
    let db = create_pool(&config.database_url).await?;

    // Initialize Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    // Initialize LLM client
    let llm = LlmClient::new(config.llm());
    if llm.is_configured() {
        info!("LLM client initialized (model: {})", llm.model_name());
    } else {
        info!("LLM_API_KEY not set; AI scoring will report every candidate as unavailable");
    }

    let settings = config.match_settings();
    info!(
        "Matching: concurrency={}, hybrid top_n={}, samples dir={}",
        settings.concurrency, settings.default_top_n, config.samples_dir
    );

    let store = Arc::new(PgMatchStore::new(db.clone()));
    let sessions = Arc::new(RedisSessionStore::new(redis));
    let matching = MatchingService::new(
        Arc::new(FileSampleSource::new(config.samples_dir.clone())),
        Arc::new(PgJobDescriptionSource::new(db)),
        sessions.clone(),
        store.clone(),
        Arc::new(AiScorer::new(Arc::new(llm))),
        settings,
    );

    let state = AppState {
        matching,
        store,
        sessions,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
