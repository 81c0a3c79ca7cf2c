//! API surface.
//!
//! - `GET  /api/config`                  — resolved directories
//! - `GET  /api/sessions`                — session list, newest first
//! - `GET  /api/sessions/:id/leaves`     — tree leaves, deepest first
//! - `GET  /api/sessions/:id/path`       — root→leaf entries
//! - `GET  /api/sessions/:id/messages`   — active-path chat history
//! - `POST /api/converse`                — SSE converse stream

pub mod converse;
pub mod sessions;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use rd_domain::error::Error;

use crate::state::AppState;

/// Assemble the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/config", get(config))
        .route("/api/sessions", get(sessions::list))
        .route("/api/sessions/:id/leaves", get(sessions::leaves))
        .route("/api/sessions/:id/path", get(sessions::path))
        .route("/api/sessions/:id/messages", get(sessions::messages))
        .route("/api/converse", post(converse::converse))
}

/// Build a standardized JSON error response: `{ "detail": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "detail": detail.into() })),
    )
        .into_response()
}

/// Map a domain error onto an HTTP response.
pub(crate) fn error_response(error: Error) -> Response {
    match error {
        Error::NotFound(detail) => api_error(StatusCode::NOT_FOUND, detail),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn config(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "config_dir": state.config.config_dir(),
        "project_cwd": state.config.project_cwd,
    }))
}
