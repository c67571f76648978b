//! # docqa-server
//!
//! HTTP API over the docqa question-answering pipeline.
//!
//! | route | purpose |
//! |-------|---------|
//! | `GET /` | greeting |
//! | `GET /health` | liveness |
//! | `POST /upload` | store and index a PDF (multipart field `file`) |
//! | `POST /search` | answer a query |
//! | `GET /documents` | list documents |
//! | `GET /documents/{id}` | one document |
//! | `DELETE /documents/{id}` | remove a document and its embeddings |
//! | `GET /stats` | corpus and cache figures |

pub mod routes;
pub mod settings;
pub mod state;

use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub use routes::MAX_UPLOAD_BYTES;
pub use settings::Settings;
pub use state::AppState;

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health))
        .route("/upload", post(routes::upload))
        .route("/search", post(routes::search))
        .route("/documents", get(routes::list_documents))
        .route("/documents/{id}", get(routes::get_document).delete(routes::delete_document))
        .route("/stats", get(routes::stats))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Serve until Ctrl-C, then finish queued cache writes.
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let state = AppState::from_settings(&settings).await?;
    let pipeline = state.pipeline.clone();

    let sweeper = {
        let pipeline = pipeline.clone();
        let period = Duration::from_secs(settings.cache_purge_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = pipeline.purge_expired_cache().await;
                debug!(removed, "expired cache entries purged");
            }
        })
    };

    let address = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(
        address = %address,
        providers = ?pipeline.embedding_providers(),
        "docqa listening"
    );

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    pipeline.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
