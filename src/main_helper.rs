use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::constants::{UPSTREAM_CONNECT_TIMEOUT_SECS, UPSTREAM_TOTAL_TIMEOUT_SECS};
use crate::db::DbPool;
use crate::registry::{ModelRegistry, SqliteModelRegistry};
use crate::store::{SqliteTranscriptStore, TranscriptStore};
use crate::types::Result;
use crate::upstream::UpstreamClient;
use crate::{handlers, health, logging};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = "pennywise.db")]
    pub database: String,
    #[arg(long, default_value_t = UPSTREAM_TOTAL_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = UPSTREAM_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 1024 * 1024)]
    pub max_body_size: usize,
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub upstream: UpstreamClient,
    /// Lookups used by the relay entry points.
    pub registry: Arc<dyn ModelRegistry>,
    /// Management operations on the same table.
    pub models: SqliteModelRegistry,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub args: Arc<Args>,
}

impl AppState {
    pub fn new(db: DbPool, args: Arc<Args>) -> Result<Self> {
        let upstream = UpstreamClient::new(
            Duration::from_secs(args.request_timeout_secs),
            Duration::from_secs(args.connect_timeout_secs),
        )?;
        let models = SqliteModelRegistry::new(db.clone());
        Ok(Self {
            registry: Arc::new(models.clone()),
            models,
            transcripts: Arc::new(SqliteTranscriptStore::new(db.clone())),
            upstream,
            db,
            args,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let max_body_size = state.args.max_body_size;
    Router::new()
        .route("/health", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .route("/api/v1/ai-chat", post(handlers::chat_stream))
        .route("/api/v1/ai-chat/history", get(handlers::chat_history))
        .route(
            "/api/v1/ai-chat/history/:id",
            delete(handlers::delete_chat_history),
        )
        .route("/api/v1/ai-analysis", post(handlers::analysis_stream))
        .route("/api/v1/ai-analysis/history", get(handlers::analysis_history))
        .route(
            "/api/v1/ai-analysis/history/:id",
            delete(handlers::delete_analysis_history),
        )
        .route(
            "/api/v1/ai-models",
            get(handlers::list_models).post(handlers::create_model),
        )
        .route(
            "/api/v1/ai-models/:id",
            get(handlers::get_model)
                .put(handlers::update_model)
                .delete(handlers::delete_model),
        )
        .route("/api/v1/ai-models/:id/test", post(handlers::check_model))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(logging::request_id_middleware))
        .with_state(state)
}
