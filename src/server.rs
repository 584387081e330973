//! Minimal status HTTP server: `GET /health` for the aggregate health
//! report, `GET /status` for basic index stats. The server never serves
//! retrieval itself — `ragctl search` and the orchestrator are the only
//! retrieval entry points — this is purely for an external monitor to
//! poll.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::health::{self, HealthReport};
use crate::state::RagState;

#[derive(Debug, Serialize)]
struct StatusResponse {
    rag_enabled: bool,
    chunk_count: usize,
    bm25_doc_count: usize,
    qa_pair_count: usize,
}

pub async fn run_server(state: Arc<RagState>) -> anyhow::Result<()> {
    let bind = state.config.server.bind.clone();

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "status server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<RagState>>) -> Json<HealthReport> {
    Json(health::run_checks(&state).await)
}

async fn status_handler(State(state): State<Arc<RagState>>) -> Json<StatusResponse> {
    let live = state.live.load();
    let qa_index = state.qa_index.load();
    Json(StatusResponse {
        rag_enabled: state.is_rag_enabled(),
        chunk_count: live.chunk_metadata.len(),
        bm25_doc_count: live.bm25_index.num_docs(),
        qa_pair_count: qa_index.as_ref().map(|q| q.len()).unwrap_or(0),
    })
}
