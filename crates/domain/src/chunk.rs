//! The converse streaming vocabulary.
//!
//! [`Chunk`] is what the agent bridge emits; [`WireEvent`] is the same
//! information as it crosses the SSE boundary (`data: <json>` frames).
//! The terminal `Result` chunk is emitted exactly once per converse and
//! is always last.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::message::ContentBlock;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge chunks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unit of a converse stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Incremental assistant text.
    TextDelta { text: String },
    /// A structured block (tool_use from the assistant, tool_result from
    /// the user echo).
    Block { block: ContentBlock },
    /// Terminal result. Exactly one per converse; always last.
    Result(ConverseResult),
}

/// Terminal converse outcome.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConverseResult {
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl ConverseResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Converse options (bridge-facing)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionMode {
    #[serde(rename = "plan")]
    Plan,
    #[serde(rename = "acceptEdits")]
    AcceptEdits,
}

impl PermissionMode {
    /// The value the agent CLI expects for `--permission-mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::AcceptEdits => "acceptEdits",
        }
    }
}

/// Options for one agent invocation.
#[derive(Debug, Clone, Default)]
pub struct ConverseOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub cwd: PathBuf,
    /// Resume this session. `None` starts a fresh one.
    pub session_id: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    /// Branch off the resumed session instead of continuing it.
    pub fork: bool,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Body of `POST /api/converse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseRequest {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_uuid: Option<String>,
    pub model: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE wire frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One `data:` frame of the converse SSE stream.
///
/// Variant order matters: untagged decoding tries `Done` (has `done`)
/// before the single-field frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEvent {
    Done {
        done: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Block {
        block: ContentBlock,
    },
    Text {
        text: String,
    },
}

impl From<Chunk> for WireEvent {
    fn from(chunk: Chunk) -> Self {
        match chunk {
            Chunk::TextDelta { text } => Self::Text { text },
            Chunk::Block { block } => Self::Block { block },
            Chunk::Result(result) => Self::Done {
                done: true,
                session_id: result.session_id,
                cost_usd: result.cost_usd,
                duration_ms: result.duration_ms,
                error: result.error,
            },
        }
    }
}

impl WireEvent {
    /// True for the terminal frame; consumers close on seeing it.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_round_trip() {
        let event = WireEvent::from(Chunk::TextDelta { text: "Hi".into() });
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"text":"Hi"}"#);
        let back: WireEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn done_frame_drops_absent_fields() {
        let event = WireEvent::from(Chunk::Result(ConverseResult::error("boom")));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"done":true,"error":"boom"}"#);
        assert!(event.is_done());
    }

    #[test]
    fn done_frame_with_identity() {
        let event = WireEvent::from(Chunk::Result(ConverseResult {
            session_id: Some("S1".into()),
            cost_usd: Some(0.001),
            duration_ms: Some(120),
            error: None,
        }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["done"], true);
        assert_eq!(value["session_id"], "S1");
        assert_eq!(value["duration_ms"], 120);
    }

    #[test]
    fn block_frame_decodes_before_text() {
        let frame = r#"{"block":{"type":"tool_use","id":"t1","name":"bash","input":{}}}"#;
        let event: WireEvent = serde_json::from_str(frame).unwrap();
        assert!(matches!(event, WireEvent::Block { .. }));
    }

    #[test]
    fn permission_mode_wire_values() {
        assert_eq!(
            serde_json::to_string(&PermissionMode::AcceptEdits).unwrap(),
            r#""acceptEdits""#
        );
        assert_eq!(
            serde_json::from_str::<PermissionMode>(r#""plan""#).unwrap(),
            PermissionMode::Plan
        );
    }
}
