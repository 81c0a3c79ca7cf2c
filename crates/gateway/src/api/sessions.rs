//! Session browsing endpoints.
//!
//! All log reads are blocking file I/O and run on the blocking pool so
//! they never stall the request-serving path.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use rd_domain::entry::{Entry, TreeEntry};
use rd_domain::error::Error;

use super::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub leaf: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.list()).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => error_response(Error::Other(format!("session scan failed: {e}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/sessions/:id/leaves
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn leaves(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.leaves(&id)).await;
    match result {
        Ok(Ok(leaves)) => Json(leaves).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(Error::Other(e.to_string())),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/sessions/:id/path?leaf=&filter=
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn path(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Response {
    let store = state.store.clone();
    let leaf = query.leaf.clone();
    let result =
        tokio::task::spawn_blocking(move || store.load_path(&id, leaf.as_deref())).await;

    let entries: Vec<TreeEntry> = match result {
        Ok(Ok(entries)) => entries,
        Ok(Err(e)) => return error_response(e),
        Err(e) => return error_response(Error::Other(e.to_string())),
    };

    let only_messages = query.filter.as_deref() == Some("messages");
    let body: Vec<_> = entries
        .into_iter()
        .filter(|e| !only_messages || e.kind.is_message())
        .map(Entry::Tree)
        .collect();
    Json(body).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/sessions/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn messages(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.load_messages(&id)).await;
    match result {
        Ok(Ok(messages)) => Json(messages).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(Error::Other(e.to_string())),
    }
}
