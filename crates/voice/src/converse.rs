//! SSE consumption of `POST /api/converse`.
//!
//! [`ConverseTransport`] is the seam the relay talks through; the
//! reqwest-backed [`ConverseClient`] is the real implementation and
//! tests substitute a scripted one.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rd_domain::chunk::{ConverseRequest, WireEvent};

/// Starts one converse stream. Cancelling the token ends the read; any
/// late events are dropped by the caller.
pub trait ConverseTransport: Send + Sync {
    fn stream(
        &self,
        request: ConverseRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<WireEvent>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct ConverseClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConverseClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl ConverseTransport for ConverseClient {
    fn stream(
        &self,
        request: ConverseRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<WireEvent> {
        let (tx, rx) = mpsc::channel::<WireEvent>(64);
        let http = self.http.clone();
        let url = format!("{}/api/converse", self.base_url.trim_end_matches('/'));

        tokio::spawn(async move {
            let response = tokio::select! {
                r = http.post(&url).json(&request).send() => r,
                _ = cancel.cancelled() => return,
            };

            let response = match response.and_then(|r| r.error_for_status()) {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx
                        .send(WireEvent::Done {
                            done: true,
                            session_id: None,
                            cost_usd: None,
                            duration_ms: None,
                            error: Some(format!("converse request failed: {e}")),
                        })
                        .await;
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut parser = SseFrameParser::default();

            loop {
                let chunk = tokio::select! {
                    chunk = body.next() => chunk,
                    _ = cancel.cancelled() => return,
                };
                let Some(chunk) = chunk else { return };
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(WireEvent::Done {
                                done: true,
                                session_id: None,
                                cost_usd: None,
                                duration_ms: None,
                                error: Some(format!("converse stream broke: {e}")),
                            })
                            .await;
                        return;
                    }
                };

                for payload in parser.push(&bytes) {
                    match serde_json::from_str::<WireEvent>(&payload) {
                        Ok(event) => {
                            let done = event.is_done();
                            if tx.send(event).await.is_err() {
                                return;
                            }
                            if done {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "undecodable SSE frame skipped");
                        }
                    }
                }
            }
        });

        rx
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incremental `data:`-frame splitter. Byte chunks may cut frames
/// anywhere; frames end on a blank line.
#[derive(Default)]
pub struct SseFrameParser {
    buf: String,
}

impl SseFrameParser {
    /// Feed raw bytes, get back completed `data` payloads.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(end) = self.buf.find("\n\n") {
            let frame: String = self.buf.drain(..end + 2).collect();
            for line in frame.lines() {
                let data = line
                    .strip_prefix("data: ")
                    .or_else(|| line.strip_prefix("data:"));
                if let Some(data) = data {
                    payloads.push(data.to_owned());
                }
            }
        }
        payloads
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
