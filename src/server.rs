//! HTTP API
//!
//! Exposes the coordinator as JSON endpoints:
//!
//! | Method | Path                          | Operation    |
//! |--------|-------------------------------|--------------|
//! | POST   | `/mine/start`                 | StartMining  |
//! | POST   | `/mine/{session_id}/pause`    | PauseMining  |
//! | POST   | `/mine/resume`                | ResumeMining |
//! | GET    | `/mine/{session_id}/status`   | GetStatus    |
//! | GET    | `/health`                     | liveness     |
//!
//! Errors are returned as `{"error": "...", "kind": "..."}` with a status
//! code derived from the error kind.

use crate::coordinator::{SessionCoordinator, StartRequest};
use crate::registry::SessionStatus;
use crate::types::SessionId;
use crate::{Error, ErrorKind, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Body of `POST /mine/start` responses and `POST /mine/resume` responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
}

/// Body of `POST /mine/resume`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub state_file: PathBuf,
}

/// Body of `POST /mine/{session_id}/pause` responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseResponse {
    pub state_file: PathBuf,
}

/// Body of `GET /health` responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
    pub total_sessions: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    requires_recovery: bool,
}

/// HTTP status for an error kind
pub fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PreconditionFailed => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind == ErrorKind::Internal {
            warn!(category = self.category(), "Request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind: kind.as_str(),
            requires_recovery: self.requires_recovery(),
        };
        (status_code(kind), Json(body)).into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::invalid_argument(format!("Invalid request body: {}", rejection.body_text()))
    }
}

/// Build the API router
pub fn router(coordinator: SessionCoordinator) -> Router {
    Router::new()
        .route("/mine/start", post(start_handler))
        .route("/mine/resume", post(resume_handler))
        .route("/mine/{session_id}/pause", post(pause_handler))
        .route("/mine/{session_id}/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, coordinator: SessionCoordinator, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::internal("http server", e.to_string()))
}

async fn start_handler(
    State(coordinator): State<SessionCoordinator>,
    body: std::result::Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>> {
    let Json(request) = body?;
    let session_id = coordinator.start(request)?;
    Ok(Json(SessionResponse { session_id }))
}

async fn pause_handler(
    State(coordinator): State<SessionCoordinator>,
    Path(session_id): Path<String>,
) -> Result<Json<PauseResponse>> {
    let state_file = coordinator.pause(&SessionId::new(session_id)).await?;
    Ok(Json(PauseResponse { state_file }))
}

async fn resume_handler(
    State(coordinator): State<SessionCoordinator>,
    body: std::result::Result<Json<ResumeRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>> {
    let Json(request) = body?;
    let session_id = coordinator.resume(&request.state_file).await?;
    Ok(Json(SessionResponse { session_id }))
}

async fn status_handler(
    State(coordinator): State<SessionCoordinator>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatus>> {
    let status = coordinator.status(&SessionId::new(session_id))?;
    Ok(Json(status))
}

async fn health_handler(State(coordinator): State<SessionCoordinator>) -> Json<HealthResponse> {
    let status = if coordinator.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.to_string(),
        active_sessions: coordinator.active_sessions(),
        total_sessions: coordinator.total_sessions(),
    })
}
