//! The voice relay state machine.
//!
//! Owns one speech session from connect to close: dispatches tool calls,
//! freezes/unfreezes around blocking tools, withholds mic audio during
//! approval holds, aborts on keywords, and drives zero-or-one in-flight
//! converse at a time. All state mutation happens on this task; the UI
//! talks to it with [`Intent`]s and reads [`Snapshot`](crate::Snapshot)s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rd_domain::chunk::{ConverseRequest, PermissionMode, WireEvent};
use rd_domain::error::Result;
use rd_domain::message::{ContentBlock, Message, Role};

use crate::approval::PendingApproval;
use crate::converse::ConverseTransport;
use crate::ports::{
    default_tool_declarations, KeywordBinding, KeywordGuard, KeywordListener, SessionSetup,
    SpeechChannel, SpeechConnector, SpeechEvent, DEFAULT_ACCEPT_WORDS, DEFAULT_REJECT_WORDS,
    DEFAULT_STOP_WORDS,
};
use crate::state::{PendingToolView, RelayStatus, VoiceStore};
use crate::tts::TtsPump;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration and intents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How `converse` tool calls are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverseMode {
    /// Execute immediately.
    Direct,
    /// Hold for accept/reject with a spoken readback.
    Review,
}

#[derive(Clone)]
pub struct RelayConfig {
    pub model: String,
    /// System prompt for agent converse calls.
    pub system_prompt: String,
    /// System prompt for the speech session itself.
    pub speech_system_prompt: String,
    pub permission_mode: Option<PermissionMode>,
    pub converse_mode: ConverseMode,
    pub stop_words: Vec<String>,
    pub accept_words: Vec<String>,
    pub reject_words: Vec<String>,
    /// Attach to an existing agent session.
    pub session_id: Option<String>,
    /// Chat history for that session (from `/api/sessions/:id/messages`).
    pub initial_messages: Vec<Message>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: String::new(),
            speech_system_prompt: String::new(),
            permission_mode: None,
            converse_mode: ConverseMode::Review,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            accept_words: DEFAULT_ACCEPT_WORDS.iter().map(|w| w.to_string()).collect(),
            reject_words: DEFAULT_REJECT_WORDS.iter().map(|w| w.to_string()).collect(),
            session_id: None,
            initial_messages: Vec::new(),
        }
    }
}

/// What the UI (or keyword callbacks) can ask of the relay.
#[derive(Debug, Clone)]
pub enum Intent {
    /// Accept the pending approval.
    Accept,
    /// Reject the pending approval.
    Reject,
    /// Abort the in-flight converse.
    Stop,
    /// Go back to message `index` and continue with a new instruction.
    Rewind { index: usize, instruction: String },
    /// End the voice session.
    Close,
}

/// Handler for a locally-declared tool.
pub type LocalToolHandler = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Everything a live session talks to.
pub struct SessionDeps {
    pub speech: Arc<dyn SpeechChannel>,
    pub speech_events: mpsc::Receiver<SpeechEvent>,
    /// Base64 PCM mic chunks from the audio I/O port.
    pub mic: mpsc::Receiver<String>,
    pub tts: TtsPump,
    pub keywords: Arc<dyn KeywordListener>,
    pub transport: Arc<dyn ConverseTransport>,
    /// Extra declared tools executed locally.
    pub local_tools: HashMap<String, LocalToolHandler>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caller-side handle to a running relay.
pub struct RelayHandle {
    intents: mpsc::Sender<Intent>,
    store: VoiceStore,
    join: JoinHandle<()>,
}

impl RelayHandle {
    pub fn store(&self) -> &VoiceStore {
        &self.store
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<crate::state::Snapshot> {
        self.store.subscribe()
    }

    pub fn intent_sender(&self) -> mpsc::Sender<Intent> {
        self.intents.clone()
    }

    pub async fn accept(&self) {
        let _ = self.intents.send(Intent::Accept).await;
    }

    pub async fn reject(&self) {
        let _ = self.intents.send(Intent::Reject).await;
    }

    pub async fn stop(&self) {
        let _ = self.intents.send(Intent::Stop).await;
    }

    pub async fn rewind(&self, index: usize, instruction: impl Into<String>) {
        let _ = self
            .intents
            .send(Intent::Rewind {
                index,
                instruction: instruction.into(),
            })
            .await;
    }

    pub async fn close(self) {
        let _ = self.intents.send(Intent::Close).await;
        let _ = self.join.await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VoiceRelay;

impl VoiceRelay {
    /// Dial the speech provider (setup: declared tools, system prompt,
    /// both transcriptions on) and start the relay over the resulting
    /// session.
    pub async fn connect(
        connector: &dyn SpeechConnector,
        mic: mpsc::Receiver<String>,
        tts: TtsPump,
        keywords: Arc<dyn KeywordListener>,
        transport: Arc<dyn ConverseTransport>,
        local_tools: HashMap<String, LocalToolHandler>,
        config: RelayConfig,
    ) -> Result<RelayHandle> {
        let setup = SessionSetup {
            system_prompt: config.speech_system_prompt.clone(),
            tools: default_tool_declarations(),
            transcribe_input: true,
            transcribe_output: true,
        };
        let (speech, speech_events) = connector.connect(setup).await?;
        Ok(Self::start(
            SessionDeps {
                speech,
                speech_events,
                mic,
                tts,
                keywords,
                transport,
                local_tools,
            },
            config,
        ))
    }

    /// Start the relay over an already-connected speech session.
    pub fn start(deps: SessionDeps, config: RelayConfig) -> RelayHandle {
        let store = VoiceStore::new();
        store.set_status(RelayStatus::Connecting);
        store.set_session(config.session_id.clone());
        store.seed_messages(config.initial_messages.clone());

        let (intent_tx, intent_rx) = mpsc::channel::<Intent>(32);
        let gated = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        spawn_mic_forwarder(deps.mic, deps.speech.clone(), gated.clone(), closed.clone());

        let relay = Relay {
            store: store.clone(),
            session_id: config.session_id.clone(),
            config,
            speech: deps.speech,
            speech_events: deps.speech_events,
            intents: intent_rx,
            intent_tx: intent_tx.clone(),
            tts: deps.tts,
            keywords: deps.keywords,
            transport: deps.transport,
            local_tools: deps.local_tools,
            gated,
            closed,
            pending_input: String::new(),
            pending_tool: None,
            approval: None,
            active: None,
            leaf_uuid: None,
            turn_boundary_seen: false,
            expected_close: false,
        };
        let join = tokio::spawn(relay.run());

        RelayHandle {
            intents: intent_tx,
            store,
            join,
        }
    }
}

/// Mic chunks reach the speech server only while ungated and live.
/// Gated chunks are dropped, not buffered — buffered speech would replay
/// as a phantom utterance after unfreeze.
fn spawn_mic_forwarder(
    mut mic: mpsc::Receiver<String>,
    speech: Arc<dyn SpeechChannel>,
    gated: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(chunk) = mic.recv().await {
            if closed.load(Ordering::Acquire) {
                break;
            }
            if gated.load(Ordering::Acquire) {
                continue;
            }
            if let Err(e) = speech.send_audio(&chunk).await {
                tracing::warn!(error = %e, "mic forward failed");
                break;
            }
        }
    });
}

// ── Internal state ───────────────────────────────────────────────────

/// The streaming tool call in flight.
struct PendingTool {
    name: String,
    args: Value,
    streaming: bool,
    text: String,
    blocks: Vec<ContentBlock>,
}

struct ApprovalHold {
    gate: Arc<PendingApproval>,
    keyword_guard: Box<dyn KeywordGuard>,
}

struct ActiveConverse {
    cancel: CancellationToken,
    rx: mpsc::Receiver<WireEvent>,
    keyword_guard: Box<dyn KeywordGuard>,
}

struct Relay {
    store: VoiceStore,
    config: RelayConfig,
    speech: Arc<dyn SpeechChannel>,
    speech_events: mpsc::Receiver<SpeechEvent>,
    intents: mpsc::Receiver<Intent>,
    intent_tx: mpsc::Sender<Intent>,
    tts: TtsPump,
    keywords: Arc<dyn KeywordListener>,
    transport: Arc<dyn ConverseTransport>,
    local_tools: HashMap<String, LocalToolHandler>,
    /// Mic gate (shared with the forwarder). Set during approval holds.
    gated: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    /// Accumulated input transcription awaiting commit.
    pending_input: String,
    pending_tool: Option<PendingTool>,
    approval: Option<ApprovalHold>,
    active: Option<ActiveConverse>,
    session_id: Option<String>,
    /// Set by rewind; consumed by the next converse (the server forks).
    leaf_uuid: Option<String>,
    /// The user's turn boundary since the converse began.
    turn_boundary_seen: bool,
    expected_close: bool,
}

enum Step {
    Speech(Option<SpeechEvent>),
    Intent(Option<Intent>),
    Converse(Option<WireEvent>),
}

async fn recv_converse(rx: Option<&mut mpsc::Receiver<WireEvent>>) -> Option<WireEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Relay {
    async fn run(mut self) {
        loop {
            let step = {
                let active_rx = self.active.as_mut().map(|a| &mut a.rx);
                tokio::select! {
                    event = self.speech_events.recv() => Step::Speech(event),
                    intent = self.intents.recv() => Step::Intent(intent),
                    event = recv_converse(active_rx) => Step::Converse(event),
                }
            };

            let stop = match step {
                Step::Speech(Some(event)) => self.on_speech(event).await,
                Step::Speech(None) => {
                    self.on_provider_closed().await;
                    true
                }
                Step::Intent(Some(intent)) => self.on_intent(intent).await,
                Step::Intent(None) => {
                    self.shutdown().await;
                    true
                }
                Step::Converse(event) => {
                    self.on_converse_event(event).await;
                    false
                }
            };
            if stop {
                break;
            }
        }
    }

    // ── Speech events ────────────────────────────────────────────────

    async fn on_speech(&mut self, event: SpeechEvent) -> bool {
        match event {
            SpeechEvent::SetupComplete => {
                self.store.set_status(RelayStatus::Connected);
                tracing::info!("speech session live");
            }
            SpeechEvent::InputTranscription { text } => {
                if !text.trim().is_empty() {
                    if !self.pending_input.is_empty() {
                        self.pending_input.push(' ');
                    }
                    self.pending_input.push_str(text.trim());
                }
            }
            SpeechEvent::OutputTranscription { text } => {
                if !text.trim().is_empty() {
                    self.store.push_voice_line(Role::Assistant, text.trim());
                }
            }
            SpeechEvent::ToolCall { id, name, args } => {
                self.on_tool_call(id, name, args).await;
            }
            SpeechEvent::TurnComplete => {
                self.turn_boundary_seen = true;
                self.try_commit_pending_tool();
            }
            SpeechEvent::Interrupted => {
                self.abort_converse().await;
                self.commit_turn();
            }
            SpeechEvent::GoAway => {
                self.store.toast("voice session ending soon");
            }
            SpeechEvent::Closed => {
                self.on_provider_closed().await;
                return true;
            }
        }
        false
    }

    /// Flush accumulated transcription into the committed log, merging
    /// with an immediately prior user turn.
    fn commit_turn(&mut self) {
        let text = std::mem::take(&mut self.pending_input);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.store.push_voice_line(Role::User, text);
        self.store.commit_user(text);
    }

    async fn on_tool_call(&mut self, id: String, name: String, args: Value) {
        tracing::debug!(tool = %name, id = %id, "tool call");
        self.commit_turn();

        match name.as_str() {
            "stop" => {
                self.abort_converse().await;
                self.respond(&id, json!({ "result": "stopped" })).await;
            }
            "converse" => {
                let instruction = args
                    .get("instruction")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let Some(instruction) = instruction else {
                    self.respond(&id, json!({ "error": "converse requires an instruction" }))
                        .await;
                    return;
                };
                match self.config.converse_mode {
                    ConverseMode::Direct => self.execute_converse(Some(id), instruction).await,
                    ConverseMode::Review => self.enter_approval(id, instruction),
                }
            }
            other => match self.local_tools.get(other) {
                Some(handler) => {
                    let result = handler(&args);
                    self.respond(&id, result).await;
                }
                None => {
                    self.respond(&id, json!({ "error": format!("Unknown tool: {other}") }))
                        .await;
                }
            },
        }
    }

    // ── Approval hold ────────────────────────────────────────────────

    fn enter_approval(&mut self, tool_id: String, instruction: String) {
        // Gate the mic first: nothing said during the hold may reach the
        // frozen speech server.
        self.gated.store(true, Ordering::Release);
        self.store.set_pending_approval(&instruction);

        // Spoken readback of what is about to run.
        self.tts.send(&instruction);
        self.tts.finish();

        let mut bindings = Vec::new();
        for word in &self.config.accept_words {
            let tx = self.intent_tx.clone();
            bindings.push(KeywordBinding::new(word.clone(), move || {
                let _ = tx.try_send(Intent::Accept);
            }));
        }
        for word in &self.config.reject_words {
            let tx = self.intent_tx.clone();
            bindings.push(KeywordBinding::new(word.clone(), move || {
                let _ = tx.try_send(Intent::Reject);
            }));
        }
        let keyword_guard = self.keywords.listen(bindings);

        self.approval = Some(ApprovalHold {
            gate: Arc::new(PendingApproval::new(tool_id, instruction)),
            keyword_guard,
        });
    }

    /// Leave the approval hold. Returns the gate if this caller won the
    /// resolution race.
    fn release_approval(&mut self) -> Option<Arc<PendingApproval>> {
        let ApprovalHold {
            gate,
            mut keyword_guard,
        } = self.approval.take()?;
        keyword_guard.stop();
        self.gated.store(false, Ordering::Release);
        self.store.clear_pending_approval();
        self.tts.interrupt();
        gate.try_resolve().then_some(gate)
    }

    /// Reject-and-respond path used by rewind and shutdown.
    async fn cancel_approval(&mut self) {
        if let Some(gate) = self.release_approval() {
            self.respond(&gate.tool_id, json!({ "status": "rejected" }))
                .await;
        }
    }

    // ── Intents ──────────────────────────────────────────────────────

    async fn on_intent(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::Accept => {
                if let Some(gate) = self.release_approval() {
                    self.execute_converse(Some(gate.tool_id.clone()), gate.instruction.clone())
                        .await;
                }
                false
            }
            Intent::Reject => {
                self.cancel_approval().await;
                false
            }
            Intent::Stop => {
                self.abort_converse().await;
                false
            }
            Intent::Rewind { index, instruction } => {
                self.rewind(index, instruction).await;
                false
            }
            Intent::Close => {
                self.shutdown().await;
                true
            }
        }
    }

    // ── Converse lifecycle ───────────────────────────────────────────

    async fn execute_converse(&mut self, tool_id: Option<String>, instruction: String) {
        // One in-flight converse at a time.
        self.abort_converse().await;

        self.store.commit_user(&instruction);

        // Unfreeze the speech server before the long-running work.
        if let Some(ref id) = tool_id {
            self.respond(id, json!({ "result": "done" })).await;
        }

        self.pending_tool = Some(PendingTool {
            name: "converse".into(),
            args: json!({ "instruction": instruction.clone() }),
            streaming: true,
            text: String::new(),
            blocks: Vec::new(),
        });
        self.store.set_pending_tool(PendingToolView {
            name: "converse".into(),
            streaming: true,
            ..Default::default()
        });
        self.turn_boundary_seen = false;

        let request = ConverseRequest {
            instruction,
            session_id: self.session_id.clone(),
            leaf_uuid: self.leaf_uuid.take(),
            model: self.config.model.clone(),
            system_prompt: self.config.system_prompt.clone(),
            permission_mode: self.config.permission_mode,
        };
        let cancel = CancellationToken::new();
        let rx = self.transport.stream(request, cancel.clone());

        let mut bindings = Vec::new();
        for word in &self.config.stop_words {
            let tx = self.intent_tx.clone();
            bindings.push(KeywordBinding::new(word.clone(), move || {
                let _ = tx.try_send(Intent::Stop);
            }));
        }
        let keyword_guard = self.keywords.listen(bindings);

        self.active = Some(ActiveConverse {
            cancel,
            rx,
            keyword_guard,
        });
    }

    async fn on_converse_event(&mut self, event: Option<WireEvent>) {
        match event {
            Some(WireEvent::Text { text }) => {
                if let Some(ref mut tool) = self.pending_tool {
                    tool.text.push_str(&text);
                }
                self.store
                    .update_pending_tool(|view| view.text.push_str(&text));
                self.tts.send(&text);
            }
            Some(WireEvent::Block { block }) => {
                if let Some(ref mut tool) = self.pending_tool {
                    tool.blocks.push(block.clone());
                }
                self.store.update_pending_tool(|view| view.blocks.push(block));
            }
            Some(WireEvent::Done {
                session_id, error, ..
            }) => {
                if let Some(error) = error {
                    tracing::warn!(error = %error, "converse failed");
                    self.store.toast(format!("agent error: {error}"));
                    self.abort_converse().await;
                    return;
                }
                if session_id.is_some() {
                    self.session_id = session_id.clone();
                    self.store.set_session(session_id);
                }
                if let Some(ref mut tool) = self.pending_tool {
                    tool.streaming = false;
                }
                self.store.update_pending_tool(|view| view.streaming = false);
                self.tts.finish();
                if let Some(mut active) = self.active.take() {
                    active.keyword_guard.stop();
                }
                self.try_commit_pending_tool();
            }
            None => {
                // The stream vanished without a terminal event.
                if self.active.is_some() {
                    self.store.toast("converse stream ended unexpectedly");
                    self.abort_converse().await;
                }
            }
        }
    }

    /// Idempotent: the first call tears the converse down and commits
    /// the partial tool; later calls are no-ops. Late events from the
    /// cancelled stream are dropped with it.
    async fn abort_converse(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        active.keyword_guard.stop();
        self.tts.interrupt();
        self.commit_pending_tool();
    }

    /// Commit once the stream has closed and the turn boundary was seen.
    fn try_commit_pending_tool(&mut self) {
        let done = matches!(self.pending_tool, Some(ref tool) if !tool.streaming);
        if done && self.turn_boundary_seen {
            self.commit_pending_tool();
        }
    }

    /// Merge the pending tool into the committed messages.
    fn commit_pending_tool(&mut self) {
        let Some(tool) = self.pending_tool.take() else {
            return;
        };
        tracing::debug!(
            tool = %tool.name,
            args = %tool.args,
            text_len = tool.text.len(),
            blocks = tool.blocks.len(),
            "committing tool output"
        );
        let mut blocks = Vec::new();
        if !tool.text.is_empty() {
            blocks.push(ContentBlock::text(tool.text));
        }
        blocks.extend(tool.blocks);
        if !blocks.is_empty() {
            self.store.commit_assistant(blocks);
        }
        self.store.clear_pending_tool();
    }

    // ── Rewind ───────────────────────────────────────────────────────

    async fn rewind(&mut self, index: usize, instruction: String) {
        self.abort_converse().await;
        self.cancel_approval().await;

        let messages = self.store.snapshot().messages;
        if index == 0 || index > messages.len() {
            self.store.toast("cannot rewind there");
            return;
        }
        let Some(anchor) = messages[index - 1].uuid.clone() else {
            self.store.toast("cannot rewind to an unsaved message");
            return;
        };

        self.store.truncate_messages(index);
        self.leaf_uuid = Some(anchor);
        self.execute_converse(None, instruction).await;
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Unexpected provider-side close.
    async fn on_provider_closed(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.abort_converse().await;
        // The socket is gone; just drop the hold.
        if let Some(mut hold) = self.approval.take() {
            hold.keyword_guard.stop();
            self.gated.store(false, Ordering::Release);
            self.store.clear_pending_approval();
        }
        self.tts.close();
        self.store.set_status(RelayStatus::Closed);
        if !self.expected_close {
            tracing::warn!("speech session closed unexpectedly");
            self.store.toast("voice session disconnected");
        }
    }

    /// User-initiated close.
    async fn shutdown(&mut self) {
        self.expected_close = true;
        self.abort_converse().await;
        self.cancel_approval().await;
        self.closed.store(true, Ordering::Release);
        self.tts.close();
        self.speech.close().await;
        self.store.set_status(RelayStatus::Closed);
        tracing::info!("voice session closed");
    }

    async fn respond(&self, id: &str, payload: Value) {
        if let Err(e) = self.speech.respond_tool_call(id, payload).await {
            tracing::warn!(id = %id, error = %e, "tool response failed");
        }
    }
}
