//! HTTP server exposing ingestion, retrieval, and chat.
//!
//! Built on [axum](https://docs.rs/axum) with permissive CORS so a browser
//! front end can talk to it directly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Sync documents into the index (`rebuild: true` starts over) |
//! | `GET` | `/sources` | Indexed sources with fragment counts |
//! | `POST` | `/sources/delete` | Delete every fragment of one source |
//! | `POST` | `/search` | Similarity search plus the assembled prompt |
//! | `POST` | `/chat/{backend}` | One turn on one track (`retry: true` regenerates) |
//! | `POST` | `/arena` | One turn on every track |
//! | `GET` | `/sessions` | Sessions, most recently active first |
//! | `GET` | `/sessions/{id}` | Persisted tracks of a session |
//! | `DELETE` | `/sessions/{id}` | Delete a session across all tracks |
//! | `GET` | `/health` | Health check |
//!
//! Errors use one body shape:
//!
//! ```json
//! { "error": { "code": "history_corruption", "message": "..." } }
//! ```

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::app::App;
use crate::chat::{Answer, ArenaAnswer};
use crate::context::AssembledContext;
use crate::documents;
use crate::error::Error;
use crate::models::{BackendTag, ConversationSession, StoredMessage};
use crate::sync::{SourceSummary, SyncReport};

/// Shared state passed to every handler.
#[derive(Clone)]
struct AppState {
    app: Arc<App>,
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let router = router(Arc::new(app));

    tracing::info!(bind = %bind_addr, "server listening");
    println!("Arena server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/sources", get(handle_list_sources))
        .route("/sources/delete", post(handle_delete_source))
        .route("/search", post(handle_search))
        .route("/chat/{backend}", post(handle_chat))
        .route("/arena", post(handle_arena))
        .route("/sessions", get(handle_list_sessions))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { app })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::HistoryCorruption { .. }
            | Error::NothingToRetry { .. }
            | Error::PendingTurn { .. } => StatusCode::CONFLICT,
            Error::Generation { .. } => StatusCode::BAD_GATEWAY,
            Error::BackendUnavailable(_) => StatusCode::BAD_REQUEST,
            Error::SessionDeleted(_) => StatusCode::GONE,
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::Ingestion { .. } | Error::Store(_) | Error::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::from(Error::Store(err))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Index ============

#[derive(Deserialize)]
struct IngestRequest {
    /// Files to ingest. Empty means scan `[documents].root`.
    #[serde(default)]
    paths: Vec<PathBuf>,
    #[serde(default)]
    rebuild: bool,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<SyncReport>, AppError> {
    let config = &state.app.config;
    let docs = if req.paths.is_empty() {
        documents::load_all(&config.documents)?
    } else {
        documents::load_paths(&req.paths)?
    };

    let report = if req.rebuild {
        state.app.sync.rebuild(&docs, &config.chunking).await?
    } else {
        state.app.sync.ingest(&docs, &config.chunking).await?
    };
    Ok(Json(report))
}

async fn handle_list_sources(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceSummary>>, AppError> {
    Ok(Json(state.app.sync.list_sources().await?))
}

#[derive(Deserialize)]
struct DeleteSourceRequest {
    source: String,
}

#[derive(Serialize)]
struct DeleteSourceResponse {
    source: String,
    removed: usize,
}

async fn handle_delete_source(
    State(state): State<AppState>,
    Json(req): Json<DeleteSourceRequest>,
) -> Result<Json<DeleteSourceResponse>, AppError> {
    let removed = state.app.sync.delete_source(&req.source).await?;
    Ok(Json(DeleteSourceResponse {
        source: req.source,
        removed,
    }))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<AssembledContext>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = req.k.unwrap_or(state.app.config.retrieval.top_k);
    Ok(Json(state.app.assembler.assemble(&req.query, k).await?))
}

// ============ Chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry: bool,
}

async fn handle_chat(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Answer>, AppError> {
    let tag: BackendTag = backend.parse().map_err(|e| bad_request(format!("{}", e)))?;
    let chat = &state.app.chat;

    if req.retry {
        let session_id = req
            .session_id
            .ok_or_else(|| bad_request("session_id is required to retry"))?;
        return Ok(Json(chat.retry(&session_id, tag).await?));
    }

    let message = non_empty(req.message)?;
    let session_id = req.session_id.unwrap_or_else(|| chat.new_session());
    Ok(Json(chat.answer(&session_id, tag, &message).await?))
}

async fn handle_arena(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ArenaAnswer>, AppError> {
    let chat = &state.app.chat;
    let message = non_empty(req.message)?;
    let session_id = req.session_id.unwrap_or_else(|| chat.new_session());
    Ok(Json(chat.answer_arena(&session_id, &message).await?))
}

fn non_empty(message: Option<String>) -> Result<String, AppError> {
    match message {
        Some(m) if !m.trim().is_empty() => Ok(m),
        _ => Err(bad_request("message must not be empty")),
    }
}

// ============ Sessions ============

async fn handle_list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSession>>, AppError> {
    Ok(Json(state.app.chat.log().list_sessions().await?))
}

#[derive(Serialize)]
struct SessionTrack {
    backend_tag: BackendTag,
    messages: Vec<StoredMessage>,
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    tracks: Vec<SessionTrack>,
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let tracks = state
        .app
        .chat
        .load_session(&id)
        .await?
        .into_iter()
        .map(|(backend_tag, messages)| SessionTrack {
            backend_tag,
            messages,
        })
        .collect();
    Ok(Json(SessionResponse {
        session_id: id,
        tracks,
    }))
}

#[derive(Serialize)]
struct DeleteSessionResponse {
    session_id: String,
    removed: u64,
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, AppError> {
    let removed = state.app.chat.delete_session(&id).await?;
    Ok(Json(DeleteSessionResponse {
        session_id: id,
        removed,
    }))
}
