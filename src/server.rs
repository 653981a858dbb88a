//! HTTP surface for UI integration.
//!
//! Exposes the query/status/maintenance half of the pipeline as a small
//! JSON API. Ingestion stays on the CLI, where the interactive
//! pause/cancel protocol lives.
//!
//! # Endpoints
//!
//! | Method   | Path          | Description |
//! |----------|---------------|-------------|
//! | `GET`    | `/health`     | Health check |
//! | `POST`   | `/query`      | Answer a question with cited sources |
//! | `GET`    | `/status`     | Indexed count and last update time |
//! | `GET`    | `/runs`       | List ingestion runs, newest first |
//! | `DELETE` | `/runs/{id}`  | Clear one run and its messages |
//! | `DELETE` | `/runs`       | Clear everything |
//!
//! Errors use the envelope
//! `{ "error": { "code", "message", "detail?" }, "sources?": [...] }` —
//! a failed synthesis still carries the retrieved sources so clients can
//! show them.
//!
//! CORS is permissive to support browser-based clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::AnswerEngine;
use crate::error::Error;
use crate::index::VectorIndex;
use crate::models::SourceCitation;
use crate::store::MessageStore;

#[derive(Clone)]
struct AppState {
    store: Arc<MessageStore>,
    index: Arc<VectorIndex>,
    engine: Arc<AnswerEngine>,
    default_max_sources: usize,
}

pub async fn run_server(
    bind: &str,
    store: Arc<MessageStore>,
    index: Arc<VectorIndex>,
    engine: Arc<AnswerEngine>,
    default_max_sources: usize,
) -> anyhow::Result<()> {
    let state = AppState {
        store,
        index,
        engine,
        default_max_sources,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/status", get(handle_status))
        .route("/runs", get(handle_list_runs).delete(handle_clear_all))
        .route("/runs/{id}", delete(handle_clear_run))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind, "server listening");
    println!("mailbrief server listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    max_sources: Option<usize>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Response {
    let max_sources = req.max_sources.unwrap_or(state.default_max_sources);

    match state.engine.answer(&req.question, max_sources).await {
        Ok(answer) => Json(answer).into_response(),
        Err(failure) => error_response(&failure.error, failure.sources),
    }
}

async fn handle_status(State(state): State<AppState>) -> Response {
    match state.index.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(&e, Vec::new()),
    }
}

#[derive(Deserialize)]
struct ListRunsParams {
    limit: Option<usize>,
}

async fn handle_list_runs(
    State(state): State<AppState>,
    Query(params): Query<ListRunsParams>,
) -> Response {
    match state.store.list_runs(params.limit.unwrap_or(50)).await {
        Ok(runs) => Json(serde_json::json!({ "runs": runs })).into_response(),
        Err(e) => error_response(&e, Vec::new()),
    }
}

async fn handle_clear_run(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.clear_run(&id).await {
        Ok(deleted) => Json(serde_json::json!({ "deleted_count": deleted })).into_response(),
        Err(e) => error_response(&e, Vec::new()),
    }
}

async fn handle_clear_all(State(state): State<AppState>) -> Response {
    match state.store.clear_all().await {
        Ok(deleted) => Json(serde_json::json!({ "deleted_count": deleted })).into_response(),
        Err(e) => error_response(&e, Vec::new()),
    }
}

fn error_response(error: &Error, sources: Vec<SourceCitation>) -> Response {
    let status = match error {
        Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::EmbeddingUnavailable(_) | Error::SynthesisFailed(_) => StatusCode::BAD_GATEWAY,
        Error::MailSource(_) => StatusCode::BAD_GATEWAY,
        Error::InvalidRecord | Error::NoItemsSelected => StatusCode::BAD_REQUEST,
        Error::RunInProgress => StatusCode::CONFLICT,
        Error::Cancelled => StatusCode::OK,
        Error::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut body = serde_json::json!({
        "error": {
            "code": error.code(),
            "message": error.to_string(),
        }
    });
    if let Some(detail) = error.detail() {
        body["error"]["detail"] = serde_json::Value::String(detail);
    }
    if !sources.is_empty() {
        body["sources"] = serde_json::to_value(&sources).unwrap_or_default();
    }

    (status, Json(body)).into_response()
}
