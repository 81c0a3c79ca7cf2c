//! Ports consumed by the voice core.
//!
//! Concrete speech/synthesis providers and audio devices live outside
//! this crate; the relay talks to them through these seams. Inbound
//! events arrive over plain mpsc receivers so a test double is just a
//! channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use rd_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Speech relay port
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Server-side events of the speech session.
#[derive(Debug, Clone)]
pub enum SpeechEvent {
    /// The session accepted our setup; the relay may go live.
    SetupComplete,
    /// Transcription of the user's mic audio.
    InputTranscription { text: String },
    /// Transcription of the speech model's own audio output.
    OutputTranscription { text: String },
    /// The speech model invoked one of the declared tools. The session
    /// stays frozen until the call is responded to.
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    /// The model's turn finished.
    TurnComplete,
    /// The user interrupted the model's audio.
    Interrupted,
    /// The provider will end the session soon.
    GoAway,
    /// The session is gone.
    Closed,
}

/// Outbound half of the speech session.
///
/// Real-time audio and client-context injection travel on distinct
/// provider channels; ordering is guaranteed within each, never across
/// them.
#[async_trait]
pub trait SpeechChannel: Send + Sync {
    /// Forward one base64 PCM mic chunk (real-time channel).
    async fn send_audio(&self, chunk_b64: &str) -> Result<()>;
    /// Inject text context (content channel).
    async fn send_client_context(&self, text: &str, turn_complete: bool) -> Result<()>;
    /// Respond to a tool call, unfreezing the session.
    async fn respond_tool_call(&self, id: &str, payload: Value) -> Result<()>;
    async fn close(&self);
}

/// Dials one speech session.
#[async_trait]
pub trait SpeechConnector: Send + Sync {
    async fn connect(
        &self,
        setup: SessionSetup,
    ) -> Result<(Arc<dyn SpeechChannel>, mpsc::Receiver<SpeechEvent>)>;
}

/// Setup sent on connect.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSetup {
    pub system_prompt: String,
    pub tools: Vec<ToolDeclaration>,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
}

/// A tool declared to the speech model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// The minimum tool set every session declares.
pub fn default_tool_declarations() -> Vec<ToolDeclaration> {
    vec![
        ToolDeclaration {
            name: "converse".into(),
            description: "Send an instruction to the coding agent and speak its reply."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "instruction": { "type": "string" }
                },
                "required": ["instruction"]
            }),
        },
        ToolDeclaration {
            name: "stop".into(),
            description: "Stop whatever the coding agent is currently doing.".into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS provider port
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events from the synthesis session.
#[derive(Debug, Clone)]
pub enum SynthesisEvent {
    /// One base64 PCM audio chunk.
    Audio { chunk_b64: String },
    /// The synthesis model finished one context turn.
    TurnComplete,
    /// The synthesis context window is exhausted.
    Overflow,
    Closed,
}

/// Outbound half of the synthesis session.
#[async_trait]
pub trait SynthesisChannel: Send + Sync {
    async fn send_context(&self, text: &str, turn_complete: bool) -> Result<()>;
    async fn close(&self);
}

/// Streaming audio output.
///
/// `flush` and `stop` are different operations and the difference is
/// load-bearing: `flush` discards in-flight audio but keeps the output
/// context open for reuse; `stop` is terminal.
pub trait AudioSink: Send + Sync {
    /// Schedule one base64 PCM chunk gaplessly after the previous one.
    fn enqueue(&self, chunk_b64: &str);
    /// Drop everything in flight, keep the device open.
    fn flush(&self);
    /// Tear the output down. No playback is possible afterwards.
    fn stop(&self);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keyword listener port
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Callback fired when a bound word is recognized in ambient audio.
pub type KeywordCallback = Arc<dyn Fn() + Send + Sync>;

/// One word→callback binding.
#[derive(Clone)]
pub struct KeywordBinding {
    pub word: String,
    pub on_match: KeywordCallback,
}

impl KeywordBinding {
    pub fn new(word: impl Into<String>, on_match: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            word: word.into(),
            on_match: Arc::new(on_match),
        }
    }
}

/// Recognizes bound words on its own input pipeline (independent of the
/// speech socket — a frozen session must not disable the listener).
/// Resolve-once semantics are the caller's job.
pub trait KeywordListener: Send + Sync {
    fn listen(&self, bindings: Vec<KeywordBinding>) -> Box<dyn KeywordGuard>;
}

/// Owner handle for one active subscription. Dropping it stops the
/// subscription; `stop` does so explicitly.
pub trait KeywordGuard: Send + Sync {
    fn stop(&mut self);
}

/// Words that abort a running converse.
pub const DEFAULT_STOP_WORDS: &[&str] = &["stop", "cancel", "nevermind", "never mind"];
/// Words that accept a pending approval.
pub const DEFAULT_ACCEPT_WORDS: &[&str] = &["accept", "approve", "yes"];
/// Words that reject a pending approval.
pub const DEFAULT_REJECT_WORDS: &[&str] = &["reject", "no", "cancel"];
