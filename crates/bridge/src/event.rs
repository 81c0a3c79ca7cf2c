//! Agent event decoding and chunk translation.
//!
//! The agent CLI emits one JSON object per stdout line. Only four shapes
//! matter here; every other message type is ignored. Decoding is
//! lenient — a line that fails to parse translates to nothing.

use serde::Deserialize;
use serde_json::Value;

use rd_domain::chunk::{Chunk, ConverseResult};
use rd_domain::message::ContentBlock;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Partial assistant output (only text deltas are interesting).
    #[serde(rename = "stream_event")]
    Stream { event: StreamPayload },

    /// A full assistant message; may contain `tool_use` blocks.
    #[serde(rename = "assistant")]
    Assistant { message: RawMessage },

    /// A user echo; may contain `tool_result` blocks.
    #[serde(rename = "user")]
    User { message: RawMessage },

    /// Terminal result.
    #[serde(rename = "result")]
    Result(ResultEvent),

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct StreamPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    /// Blocks are decoded individually so one odd block does not drop
    /// its siblings.
    #[serde(default)]
    pub content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default, rename = "total_cost_usd")]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Translate one stdout line into zero or more chunks.
pub fn translate_line(line: &str) -> Vec<Chunk> {
    match serde_json::from_str::<AgentEvent>(line) {
        Ok(event) => translate(event),
        Err(_) => Vec::new(),
    }
}

fn translate(event: AgentEvent) -> Vec<Chunk> {
    match event {
        AgentEvent::Stream { event } => {
            if event.kind != "content_block_delta" {
                return Vec::new();
            }
            let Some(text) = event.delta.and_then(|d| d.text) else {
                return Vec::new();
            };
            // Partially-encoded deltas arrive with empty text; skip them.
            if text.is_empty() {
                return Vec::new();
            }
            vec![Chunk::TextDelta { text }]
        }

        AgentEvent::Assistant { message } => blocks_of(&message, |b| {
            matches!(b, ContentBlock::ToolUse { .. })
        }),

        AgentEvent::User { message } => blocks_of(&message, |b| {
            matches!(b, ContentBlock::ToolResult { .. })
        }),

        AgentEvent::Result(result) => vec![Chunk::Result(result.into())],

        AgentEvent::Other => Vec::new(),
    }
}

fn blocks_of(message: &RawMessage, keep: impl Fn(&ContentBlock) -> bool) -> Vec<Chunk> {
    message
        .content
        .iter()
        .filter_map(|raw| serde_json::from_value::<ContentBlock>(raw.clone()).ok())
        .filter(|block| keep(block))
        .map(|block| Chunk::Block { block })
        .collect()
}

impl From<ResultEvent> for ConverseResult {
    fn from(event: ResultEvent) -> Self {
        let error = if event.is_error {
            Some(if event.errors.is_empty() {
                event
                    .result
                    .as_ref()
                    .map(value_to_text)
                    .unwrap_or_else(|| "agent reported an error".to_owned())
            } else {
                event
                    .errors
                    .iter()
                    .map(value_to_text)
                    .collect::<Vec<_>>()
                    .join("; ")
            })
        } else {
            None
        };

        Self {
            session_id: event.session_id,
            cost_usd: event.cost_usd,
            duration_ms: event.duration_ms,
            error,
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_translates() {
        let chunks = translate_line(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}}"#,
        );
        assert_eq!(chunks, vec![Chunk::TextDelta { text: "Hi".into() }]);
    }

    #[test]
    fn empty_text_delta_is_skipped() {
        let chunks = translate_line(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":""}}}"#,
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn non_delta_stream_events_are_skipped() {
        let chunks = translate_line(
            r#"{"type":"stream_event","event":{"type":"content_block_start","content_block":{"type":"text"}}}"#,
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn assistant_message_yields_tool_use_blocks_only() {
        let chunks = translate_line(
            r#"{"type":"assistant","message":{"content":[
                {"type":"text","text":"let me check"},
                {"type":"tool_use","id":"t1","name":"bash","input":{"command":"ls"}}
            ]}}"#,
        );
        assert_eq!(chunks.len(), 1);
        assert!(matches!(
            &chunks[0],
            Chunk::Block {
                block: ContentBlock::ToolUse { id, .. }
            } if id == "t1"
        ));
    }

    #[test]
    fn user_echo_yields_tool_result_blocks() {
        let chunks = translate_line(
            r#"{"type":"user","message":{"content":[
                {"type":"tool_result","tool_use_id":"t1","content":"ok"}
            ]}}"#,
        );
        assert_eq!(chunks.len(), 1);
        assert!(matches!(
            &chunks[0],
            Chunk::Block {
                block: ContentBlock::ToolResult { tool_use_id, .. }
            } if tool_use_id == "t1"
        ));
    }

    #[test]
    fn result_success() {
        let chunks = translate_line(
            r#"{"type":"result","session_id":"S1","is_error":false,"duration_ms":120,"total_cost_usd":0.001,"result":"done"}"#,
        );
        match &chunks[0] {
            Chunk::Result(result) => {
                assert_eq!(result.session_id.as_deref(), Some("S1"));
                assert_eq!(result.duration_ms, Some(120));
                assert_eq!(result.cost_usd, Some(0.001));
                assert!(result.error.is_none());
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn result_error_joins_error_list() {
        let chunks = translate_line(
            r#"{"type":"result","is_error":true,"errors":["rate limited","retry later"]}"#,
        );
        match &chunks[0] {
            Chunk::Result(result) => {
                assert_eq!(result.error.as_deref(), Some("rate limited; retry later"));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn result_error_falls_back_to_result_text() {
        let chunks =
            translate_line(r#"{"type":"result","is_error":true,"result":"boom"}"#);
        match &chunks[0] {
            Chunk::Result(result) => assert_eq!(result.error.as_deref(), Some("boom")),
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn unknown_types_and_garbage_are_ignored() {
        assert!(translate_line(r#"{"type":"system","subtype":"init"}"#).is_empty());
        assert!(translate_line("not json").is_empty());
    }
}
