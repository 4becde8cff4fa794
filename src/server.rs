//! HTTP surface for chat widgets and the operator dashboard.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/api/chat/{thread}/prepare` | Assemble the thread's corpus snapshot |
//! | `POST`   | `/api/chat/{thread}/inference/{message_id}` | Generate (or replay) a reply |
//! | `POST`   | `/api/workspaces/{workspace}/knowledge` | Save and index a note and/or file |
//! | `DELETE` | `/api/knowledge/{id}` | Remove a knowledge item |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "note or file required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! Inference never answers with an error envelope: when the engine fails
//! the visitor still receives the fallback apology with `"status": "fail"`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so chat widgets can be
//! embedded on tenant sites.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use parley_core::inference::FALLBACK_REPLY;
use parley_core::knowledge::{NewKnowledge, UploadedFile};
use parley_core::models::OwnerScope;
use parley_core::Engine;

use crate::config::Config;
use crate::engine::build_engine;

/// Starts the HTTP server on `[server].bind` with the production engine.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    serve_engine(engine, &config.server.bind).await
}

/// Serves an already-built engine. Runs until the process is terminated.
pub async fn serve_engine(engine: Engine, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(bind = bind_addr, "server listening");
    println!("Parley server listening on http://{}", bind_addr);
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

/// Routes with CORS applied.
pub fn router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat/{thread}/prepare", post(handle_prepare))
        .route(
            "/api/chat/{thread}/inference/{message_id}",
            post(handle_inference),
        )
        .route(
            "/api/workspaces/{workspace}/knowledge",
            post(handle_add_knowledge),
        )
        .route("/api/knowledge/{id}", delete(handle_delete_knowledge))
        .layer(cors)
        .with_state(engine)
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::warn!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: format!("{:#}", err),
        }
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

// ============ POST /api/chat/{thread}/prepare ============

#[derive(Serialize)]
struct PrepareResponse {
    status: &'static str,
    records: usize,
}

async fn handle_prepare(
    State(engine): State<Engine>,
    Path(thread): Path<String>,
) -> Result<Json<PrepareResponse>, AppError> {
    let snapshot = engine.prepare(&thread).await?;
    Ok(Json(PrepareResponse {
        status: "success",
        records: snapshot.len(),
    }))
}

// ============ POST /api/chat/{thread}/inference/{message_id} ============

#[derive(Serialize)]
struct InferenceResponse {
    status: &'static str,
    response: String,
}

async fn handle_inference(
    State(engine): State<Engine>,
    Path((thread, message_id)): Path<(String, i64)>,
) -> Json<InferenceResponse> {
    match engine.generate(&thread, message_id).await {
        Ok(response) => Json(InferenceResponse {
            status: "success",
            response,
        }),
        Err(e) => {
            tracing::warn!(thread = %thread, message_id, error = %format!("{:#}", e), "inference failed");
            Json(InferenceResponse {
                status: "fail",
                response: FALLBACK_REPLY.to_string(),
            })
        }
    }
}

// ============ POST /api/workspaces/{workspace}/knowledge ============

#[derive(Deserialize)]
struct KnowledgeRequest {
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    shared: bool,
    /// Attach the item to this thread instead of the whole workspace.
    #[serde(default)]
    thread: Option<String>,
    #[serde(default)]
    file: Option<FilePayload>,
}

#[derive(Deserialize)]
struct FilePayload {
    name: String,
    #[serde(default)]
    mime_type: String,
    data_base64: String,
}

#[derive(Serialize)]
struct KnowledgeResponse {
    status: &'static str,
    knowledge_id: i64,
    title: String,
    chunks: usize,
    embedded: usize,
    stored: bool,
}

async fn handle_add_knowledge(
    State(engine): State<Engine>,
    Path(workspace_slug): Path<String>,
    Json(request): Json<KnowledgeRequest>,
) -> Result<Json<KnowledgeResponse>, AppError> {
    let note = request.note.filter(|n| !n.trim().is_empty());
    if note.is_none() && request.file.is_none() {
        return Err(bad_request("note or file required"));
    }

    let repo = engine.repository();
    let workspace = repo
        .find_workspace_by_slug(&workspace_slug)
        .await?
        .ok_or_else(|| not_found(format!("workspace not found: {}", workspace_slug)))?;

    let owner = match request.thread.as_deref() {
        None => OwnerScope::Workspace(workspace.id),
        Some(slug) => {
            let thread = repo
                .find_thread(slug)
                .await?
                .filter(|t| t.workspace_id == workspace.id)
                .ok_or_else(|| not_found(format!("thread not found: {}", slug)))?;
            OwnerScope::Thread(thread.id)
        }
    };

    let file = match request.file {
        Some(payload) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(payload.data_base64.as_bytes())
                .map_err(|e| bad_request(format!("file.data_base64: {}", e)))?;
            Some(UploadedFile {
                name: payload.name,
                mime_type: payload.mime_type,
                bytes,
            })
        }
        None => None,
    };

    let report = engine
        .save_knowledge(NewKnowledge {
            owner,
            note,
            file,
            shared: request.shared,
        })
        .await
        .map_err(|e| bad_request(format!("{:#}", e)))?;

    Ok(Json(KnowledgeResponse {
        status: "success",
        knowledge_id: report.item.id,
        title: report.item.title,
        chunks: report.chunks,
        embedded: report.embedded,
        stored: report.stored,
    }))
}

// ============ DELETE /api/knowledge/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    status: &'static str,
    knowledge_id: i64,
}

async fn handle_delete_knowledge(
    State(engine): State<Engine>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, AppError> {
    match engine.delete_knowledge(id).await? {
        Some(item) => Ok(Json(DeleteResponse {
            status: "success",
            knowledge_id: item.id,
        })),
        None => Err(not_found(format!("knowledge item not found: {}", id))),
    }
}
