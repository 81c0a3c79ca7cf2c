//! The TTS pump: one persistent synthesis session, reused across many
//! converse calls.
//!
//! Streamed agent text accumulates in a [`SentenceBuffer`]; each flush
//! is delivered as a single turn-complete context message (only
//! `turnComplete=true` triggers audio on the provider side). The text is
//! prefixed with a read marker so the synthesis model reads it instead
//! of answering it.
//!
//! `interrupt()` flushes the audio sink but keeps it open; `close()` is
//! the only operation that stops it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::ports::{AudioSink, SynthesisChannel, SynthesisEvent};
use crate::sentence::{SentenceBuffer, MAX_WAIT_MS};

/// Marker that makes the synthesis model read the text verbatim. The
/// session's system instruction reinforces it.
pub const READ_PREFIX: &str = "[READ]: ";

/// System instruction bound to the synthesis session.
pub const SYNTH_SYSTEM_PROMPT: &str = "You are a text-to-speech voice. Read any text \
     after a [READ]: marker aloud exactly as written. Never answer, comment, or add words.";

type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Clone)]
pub struct TtsPump {
    inner: Arc<Inner>,
}

struct Inner {
    synth: Arc<dyn SynthesisChannel>,
    sink: Arc<dyn AudioSink>,
    state: Mutex<PumpState>,
    /// Ordered flush queue; a single sender task keeps sentence order.
    out_tx: mpsc::UnboundedSender<String>,
    on_error: ErrorHandler,
}

struct PumpState {
    buffer: SentenceBuffer,
    /// Flushes in flight: incremented per send, decremented per
    /// provider turn-complete. Guards draining.
    pending_sends: usize,
    /// Set by `interrupt()`; audio chunks are dropped while set;
    /// cleared by the next `send()`.
    muted: bool,
    /// Set by `finish()`; reset by `send()`/`interrupt()`.
    finishing: bool,
    closed: bool,
    /// Invalidates outstanding fallback timers.
    generation: u64,
}

impl TtsPump {
    pub fn new(
        synth: Arc<dyn SynthesisChannel>,
        sink: Arc<dyn AudioSink>,
        events: mpsc::Receiver<SynthesisEvent>,
        on_error: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let inner = Arc::new(Inner {
            synth,
            sink,
            state: Mutex::new(PumpState {
                buffer: SentenceBuffer::new(),
                pending_sends: 0,
                muted: false,
                finishing: false,
                closed: false,
                generation: 0,
            }),
            out_tx,
            on_error: Arc::new(on_error),
        });

        spawn_sender(inner.clone(), out_rx);
        spawn_event_loop(inner.clone(), events);
        Self { inner }
    }

    /// Feed streamed text. Clears mute; may flush a sentence.
    pub fn send(&self, text: &str) {
        let flushed = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.muted = false;
            state.finishing = false;
            let flushed = state.buffer.push(text);
            state.generation += 1;
            if flushed.is_some() {
                state.pending_sends += 1;
            } else if !state.buffer.is_empty() {
                self.schedule_fallback(state.generation);
            }
            flushed
        };
        if let Some(text) = flushed {
            let _ = self.inner.out_tx.send(text);
        }
    }

    /// No more text for this converse: flush the remainder and drain.
    /// The connection stays alive for the next converse.
    pub fn finish(&self) {
        let flushed = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.finishing = true;
            state.generation += 1;
            match state.buffer.take() {
                Some(text) => {
                    state.pending_sends += 1;
                    Some(text)
                }
                None => None,
            }
        };
        if let Some(text) = flushed {
            let _ = self.inner.out_tx.send(text);
        }
    }

    /// Cut playback now. Drops buffered text and in-flight audio, mutes
    /// until the next `send()`. The audio output context is flushed —
    /// never stopped — so it stays usable.
    pub fn interrupt(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.muted = true;
            state.buffer.clear();
            state.pending_sends = 0;
            state.finishing = false;
            state.generation += 1;
        }
        self.inner.sink.flush();
    }

    /// Terminal teardown: stops the audio sink irreversibly and closes
    /// the synthesis socket.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.inner.sink.stop();
        let synth = self.inner.synth.clone();
        tokio::spawn(async move { synth.close().await });
    }

    pub fn pending_sends(&self) -> usize {
        self.inner.state.lock().pending_sends
    }

    pub fn is_muted(&self) -> bool {
        self.inner.state.lock().muted
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Arm the MAX_WAIT fallback for text sitting without a boundary.
    fn schedule_fallback(&self, generation: u64) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(MAX_WAIT_MS)).await;
            let flushed = {
                let mut state = inner.state.lock();
                if state.closed || state.generation != generation {
                    return;
                }
                match state.buffer.take() {
                    Some(text) => {
                        state.pending_sends += 1;
                        state.generation += 1;
                        Some(text)
                    }
                    None => None,
                }
            };
            if let Some(text) = flushed {
                let _ = inner.out_tx.send(text);
            }
        });
    }
}

/// Serially deliver flushes to the synthesis session, in order.
fn spawn_sender(inner: Arc<Inner>, mut out_rx: mpsc::UnboundedReceiver<String>) {
    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            let payload = format!("{READ_PREFIX}{text}");
            if let Err(e) = inner.synth.send_context(&payload, true).await {
                tracing::warn!(error = %e, "tts context send failed");
            }
        }
    });
}

fn spawn_event_loop(inner: Arc<Inner>, mut events: mpsc::Receiver<SynthesisEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SynthesisEvent::Audio { chunk_b64 } => {
                    let state = inner.state.lock();
                    if !state.muted && !state.closed {
                        inner.sink.enqueue(&chunk_b64);
                    }
                }
                SynthesisEvent::TurnComplete => {
                    let mut state = inner.state.lock();
                    state.pending_sends = state.pending_sends.saturating_sub(1);
                    if state.finishing && state.pending_sends == 0 {
                        tracing::debug!("tts pump drained");
                    }
                }
                SynthesisEvent::Overflow => {
                    tracing::warn!("tts context window exhausted, closing synthesis");
                    {
                        let mut state = inner.state.lock();
                        if state.closed {
                            continue;
                        }
                        state.closed = true;
                    }
                    inner.sink.stop();
                    (inner.on_error)("voice output ran out of context".to_owned());
                    let synth = inner.synth.clone();
                    tokio::spawn(async move { synth.close().await });
                }
                SynthesisEvent::Closed => {
                    let mut state = inner.state.lock();
                    state.closed = true;
                }
            }
        }
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
