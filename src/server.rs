//! JSON HTTP shell.
//!
//! Exposes chat sessions over HTTP so a browser front end (or `curl`) can
//! upload filings and ask questions. Each session has its own index and
//! history; see [`crate::session`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sessions` | Create a session, returns `{ "id" }` |
//! | `PUT`    | `/sessions/{id}/documents` | Upload the session's PDF set (base64) |
//! | `DELETE` | `/sessions/{id}/documents` | Drop documents and history |
//! | `POST`   | `/sessions/{id}/chat` | Ask a question |
//! | `GET`    | `/sessions/{id}/history` | Conversation so far |
//! | `DELETE` | `/sessions/{id}` | Drop the session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "load_error", "message": "scan.pdf: not a PDF document" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `load_error` (422),
//! `embedding_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::index::VectorIndex;
use crate::ingest::{check_document_names, IngestError};
use crate::models::{ChatMessage, Document};
use crate::session::{Backends, ReplyOutcome, Session, SessionError, SessionManager};

/// Uploads are base64 JSON; allow a few typical filings per request.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionManager>,
    /// Pre-built index loaded into every new session, if configured.
    prebuilt: Option<Arc<VectorIndex>>,
}

/// Starts the HTTP server with backends built from `config`.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backends = Backends::from_config(config)?;
    run_server_with_backends(config, backends).await
}

/// Like [`run_server`], with caller-supplied embedding and language models.
pub async fn run_server_with_backends(config: &Config, backends: Backends) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let prebuilt = match &config.index.path {
        Some(path) => Some(Arc::new(VectorIndex::load(path)?)),
        None => None,
    };

    let state = AppState {
        sessions: Arc::new(SessionManager::new(Arc::new(config.clone()), backends)),
        prebuilt,
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    eprintln!("finrag server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route("/sessions/{id}", delete(handle_delete_session))
        .route(
            "/sessions/{id}/documents",
            put(handle_set_documents).delete(handle_clear_documents),
        )
        .route("/sessions/{id}/chat", post(handle_chat))
        .route("/sessions/{id}/history", get(handle_history))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
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

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::Ingest(IngestError::InvalidName { .. }) => bad_request(message),
            SessionError::Ingest(IngestError::Load(_) | IngestError::Empty) => {
                app_error(StatusCode::UNPROCESSABLE_ENTITY, "load_error", message)
            }
            SessionError::Ingest(IngestError::Embedding(_)) => {
                app_error(StatusCode::BAD_GATEWAY, "embedding_error", message)
            }
            SessionError::Setup(_) => {
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

async fn session_or_404(state: &AppState, id: &str) -> Result<Arc<Session>, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| not_found(format!("session not found: {id}")))
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

// ============ Sessions ============

#[derive(Serialize)]
struct CreateSessionResponse {
    id: String,
}

async fn handle_create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let (id, session) = state.sessions.create().await;
    if let Some(index) = &state.prebuilt {
        session.load_index(index.as_ref().clone()).await?;
    }
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { id })))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("session not found: {id}")))
    }
}

// ============ Documents ============

#[derive(Deserialize)]
struct UploadedFile {
    name: String,
    content_base64: String,
}

#[derive(Deserialize)]
struct SetDocumentsRequest {
    files: Vec<UploadedFile>,
}

#[derive(Serialize)]
struct SetDocumentsResponse {
    status: String,
    session_key: Option<String>,
    chunks: usize,
}

async fn handle_set_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetDocumentsRequest>,
) -> Result<Json<SetDocumentsResponse>, AppError> {
    let session = session_or_404(&state, &id).await?;

    let mut files = Vec::with_capacity(req.files.len());
    for file in req.files {
        let bytes = STANDARD
            .decode(file.content_base64.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", file.name, e)))?;
        files.push(Document::new(file.name, bytes));
    }
    check_document_names(&files).map_err(|e| bad_request(e.to_string()))?;

    let status = session.set_documents(files).await?;
    let chunks = session.index().await.map(|i| i.len()).unwrap_or(0);
    Ok(Json(SetDocumentsResponse {
        status: status.label().to_string(),
        session_key: session.current_key().await.map(|k| k.to_string()),
        chunks,
    }))
}

async fn handle_clear_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let session = session_or_404(&state, &id).await?;
    session.clear().await;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    outcome: ReplyOutcome,
}

async fn handle_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let session = session_or_404(&state, &id).await?;
    let reply = session.ask(req.question.trim()).await;
    Ok(Json(ChatResponse {
        answer: reply.text,
        outcome: reply.outcome,
    }))
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<ChatMessage>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = session_or_404(&state, &id).await?;
    Ok(Json(HistoryResponse {
        messages: session.history().await,
    }))
}
