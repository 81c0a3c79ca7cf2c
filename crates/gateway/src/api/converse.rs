//! `POST /api/converse` — the SSE converse stream.
//!
//! Flow: optionally fork the conversation at the requested leaf, then
//! spawn one agent subprocess and re-emit its chunks as `data:` frames.
//! The terminal `{done:true, …}` frame is emitted exactly once; client
//! disconnect kills the subprocess via a drop guard.

use axum::extract::State;
use axum::http::{header, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use rd_domain::chunk::{Chunk, ConverseOptions, ConverseRequest, ConverseResult, WireEvent};

use crate::state::AppState;

/// Cancels the converse when the SSE stream is dropped (client gone).
struct AbortOnDrop(CancellationToken);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub async fn converse(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<ConverseRequest>,
) -> impl IntoResponse {
    let stream = converse_stream(state, body);

    // Proxy-buffering would defeat the point of streaming.
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
}

fn converse_stream(
    state: AppState,
    body: ConverseRequest,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        // ── Optional fork ────────────────────────────────────────────
        let mut session_id = body.session_id.clone();
        let mut forked = false;
        if let (Some(ref id), Some(ref leaf)) = (body.session_id.clone(), body.leaf_uuid.clone())
        {
            if state.store.exists(id) {
                let store = state.store.clone();
                let (id, leaf) = (id.clone(), leaf.clone());
                let fork = tokio::task::spawn_blocking(move || store.fork(&id, &leaf)).await;
                match fork {
                    Ok(Ok(new_id)) => {
                        session_id = Some(new_id);
                        forked = true;
                    }
                    Ok(Err(e)) => {
                        yield Ok(done_event(ConverseResult::error(e.to_string())));
                        return;
                    }
                    Err(e) => {
                        yield Ok(done_event(ConverseResult::error(e.to_string())));
                        return;
                    }
                }
            }
        }

        // ── Stream the agent ─────────────────────────────────────────
        let opts = ConverseOptions {
            model: Some(body.model.clone()),
            system_prompt: Some(body.system_prompt.clone()),
            cwd: state.config.project_cwd.clone(),
            session_id,
            permission_mode: body.permission_mode,
            fork: forked,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
        };

        let cancel = CancellationToken::new();
        let _abort = AbortOnDrop(cancel.clone());
        let mut rx = state.bridge.converse(&body.instruction, opts, cancel.clone());

        while let Some(chunk) = rx.recv().await {
            let done = matches!(chunk, Chunk::Result(_));
            let frame = WireEvent::from(chunk);
            match serde_json::to_string(&frame) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => {
                    tracing::error!(error = %e, "serializing SSE frame failed");
                    yield Ok(done_event(ConverseResult::error(e.to_string())));
                    return;
                }
            }
            if done {
                return;
            }
        }
        // _abort drops here; a vanished bridge channel also kills the child.
    }
}

fn done_event(result: ConverseResult) -> Event {
    let frame = WireEvent::from(Chunk::Result(result));
    // A struct of options and strings cannot fail to serialize.
    let json = serde_json::to_string(&frame)
        .unwrap_or_else(|_| r#"{"done":true,"error":"internal"}"#.to_owned());
    Event::default().data(json)
}
