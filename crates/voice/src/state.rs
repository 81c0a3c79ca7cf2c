//! Observable client state.
//!
//! The relay is the single writer; the UI subscribes to snapshots and
//! sends intents back — it never mutates state itself. Two arrays are
//! deliberate: `messages` is the committed conversation (rewind
//! truncates it), `voice_log` is session-local speech history (rewind
//! never touches it).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use rd_domain::message::{ContentBlock, Message, Role};

/// How long a toast stays visible.
const TOAST_TTL: Duration = Duration::from_secs(4);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// One line of the ephemeral voice log.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceLine {
    pub role: Role,
    pub text: String,
}

/// Live view of the tool call currently streaming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingToolView {
    pub name: String,
    pub streaming: bool,
    pub text: String,
    pub blocks: Vec<ContentBlock>,
}

/// Everything the UI renders.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub status: RelayStatus,
    pub session_id: Option<String>,
    /// Committed conversation; truncated by rewind.
    pub messages: Vec<Message>,
    /// Session-local speech history; never truncated by rewind.
    pub voice_log: Vec<VoiceLine>,
    pub pending_tool: Option<PendingToolView>,
    /// Instruction awaiting accept/reject.
    pub pending_approval: Option<String>,
    pub toast: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot holder with typed mutators. Cheap to clone.
#[derive(Clone)]
pub struct VoiceStore {
    tx: Arc<watch::Sender<Snapshot>>,
    /// Fires once per utterance commit, for external collaborators.
    utterances: broadcast::Sender<String>,
    toast_seq: Arc<std::sync::atomic::AtomicU64>,
}

impl Default for VoiceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        let (utterances, _) = broadcast::channel(32);
        Self {
            tx: Arc::new(tx),
            utterances,
            toast_seq: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn subscribe_utterances(&self) -> broadcast::Receiver<String> {
        self.utterances.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    fn mutate(&self, f: impl FnOnce(&mut Snapshot)) {
        self.tx.send_modify(f);
    }

    // ── status / session ─────────────────────────────────────────────

    pub fn set_status(&self, status: RelayStatus) {
        self.mutate(|s| s.status = status);
    }

    pub fn set_session(&self, session_id: Option<String>) {
        self.mutate(|s| s.session_id = session_id);
    }

    // ── committed messages ───────────────────────────────────────────

    pub fn seed_messages(&self, messages: Vec<Message>) {
        self.mutate(|s| s.messages = messages);
    }

    /// Append user text, merging with an immediately prior user message.
    pub fn commit_user(&self, text: &str) {
        self.mutate(|s| match s.messages.last_mut() {
            Some(last) if last.role == Role::User => {
                let joined = format!("{}\n{}", last.content.plain_text(), text);
                last.content = rd_domain::message::MessageContent::Text(joined);
                last.uuid = None;
            }
            _ => s.messages.push(Message::user(text)),
        });
        let _ = self.utterances.send(text.to_owned());
    }

    pub fn commit_assistant(&self, blocks: Vec<ContentBlock>) {
        self.mutate(|s| s.messages.push(Message::assistant(blocks)));
    }

    /// Rewind: keep `messages[0..k]` only.
    pub fn truncate_messages(&self, k: usize) {
        self.mutate(|s| s.messages.truncate(k));
    }

    // ── voice log ────────────────────────────────────────────────────

    pub fn push_voice_line(&self, role: Role, text: &str) {
        self.mutate(|s| s.voice_log.push(VoiceLine {
            role,
            text: text.to_owned(),
        }));
    }

    // ── pending tool / approval ──────────────────────────────────────

    pub fn set_pending_tool(&self, view: PendingToolView) {
        self.mutate(|s| s.pending_tool = Some(view));
    }

    pub fn update_pending_tool(&self, f: impl FnOnce(&mut PendingToolView)) {
        self.mutate(|s| {
            if let Some(ref mut view) = s.pending_tool {
                f(view);
            }
        });
    }

    pub fn clear_pending_tool(&self) {
        self.mutate(|s| s.pending_tool = None);
    }

    pub fn set_pending_approval(&self, instruction: &str) {
        self.mutate(|s| s.pending_approval = Some(instruction.to_owned()));
    }

    pub fn clear_pending_approval(&self) {
        self.mutate(|s| s.pending_approval = None);
    }

    // ── toast ────────────────────────────────────────────────────────

    /// Show an ephemeral toast; it clears itself after a few seconds.
    pub fn toast(&self, message: impl Into<String>) {
        use std::sync::atomic::Ordering;
        let seq = self.toast_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.mutate(|s| s.toast = Some(message.into()));

        let tx = self.tx.clone();
        let toast_seq = self.toast_seq.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TOAST_TTL).await;
            // Only clear if no newer toast replaced this one.
            if toast_seq.load(Ordering::SeqCst) == seq {
                tx.send_modify(|s| s.toast = None);
            }
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
