//! Persisted conversation-log records.
//!
//! A log file is append-only newline-delimited JSON. The schema is
//! heterogeneous: four *tree* variants (`user`, `assistant`, `system`,
//! `progress`) carry uuid/parent linkage; everything else (`summary`,
//! `custom-title`, `queue-operation`, unknown records) is retained as raw
//! JSON so a fork can copy it verbatim. Parsing is lenient: unknown
//! fields ride along in `extra`.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tree entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    User,
    Assistant,
    System,
    Progress,
}

impl TreeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Progress => "progress",
        }
    }

    /// True for the variants that carry a user/assistant message.
    pub fn is_message(&self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }
}

/// A record that participates in the conversation tree.
///
/// `message` is kept as raw JSON: fork copies it untouched, and callers
/// that need structured content parse it on demand (and skip it when the
/// shape is unexpected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    #[serde(rename = "type")]
    pub kind: TreeKind,
    pub uuid: String,
    #[serde(rename = "parentUuid")]
    pub parent_uuid: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TreeEntry {
    /// Parse the embedded message, if present and well-formed.
    pub fn parsed_message(&self) -> Option<Message> {
        let raw = self.message.as_ref()?;
        serde_json::from_value(raw.clone()).ok()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry — the full record sum type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One log line: either a tree record or an opaque record kept verbatim.
#[derive(Debug, Clone)]
pub enum Entry {
    Tree(TreeEntry),
    Other(Value),
}

impl Entry {
    pub fn tree(&self) -> Option<&TreeEntry> {
        match self {
            Self::Tree(entry) => Some(entry),
            Self::Other(_) => None,
        }
    }

    pub fn tree_mut(&mut self) -> Option<&mut TreeEntry> {
        match self {
            Self::Tree(entry) => Some(entry),
            Self::Other(_) => None,
        }
    }

    /// The `queue-operation` record a fork prepends to its new log.
    pub fn queue_operation(session_id: &str, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        Self::Other(serde_json::json!({
            "type": "queue-operation",
            "operation": "dequeue",
            "sessionId": session_id,
            "timestamp": timestamp.to_rfc3339(),
        }))
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let kind = value.get("type").and_then(Value::as_str);
        if matches!(kind, Some("user" | "assistant" | "system" | "progress")) {
            // A tree-typed record missing its linkage fields degrades to
            // an opaque record rather than failing the whole line.
            if let Ok(entry) = serde_json::from_value::<TreeEntry>(value.clone()) {
                return Ok(Self::Tree(entry));
            }
        }
        Ok(Self::Other(value))
    }
}

impl Serialize for Entry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Tree(entry) => entry.serialize(serializer),
            Self::Other(value) => value.serialize(serializer),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
