//! Store operations over one project's log directory.
//!
//! - `list()` — tail-scanned previews, newest first
//! - `load_path()` — root→leaf entries for a session
//! - `load_messages()` — the path filtered to user/assistant messages
//! - `fork()` — write a new session containing a chosen root→leaf path

use std::path::{Path, PathBuf};

use serde::Serialize;

use rd_domain::entry::{Entry, TreeEntry, TreeKind};
use rd_domain::error::{Error, Result};
use rd_domain::message::Message;

use crate::log;
use crate::preview::preview_blocks;
use crate::tree::ConversationTree;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One row of `list()`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// One leaf of a session's tree.
#[derive(Debug, Clone, Serialize)]
pub struct LeafInfo {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: TreeKind,
    pub depth: usize,
    pub preview: String,
    pub is_active: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-mostly store over `<configRoot>/projects/<slug>/`.
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The log file for a session id.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.log"))
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.session_path(session_id).is_file()
    }

    // ── list ─────────────────────────────────────────────────────────

    /// All sessions with a recoverable title, newest first.
    ///
    /// Never fails on one bad file — unreadable or title-less logs are
    /// dropped from the result.
    pub fn list(&self) -> Vec<SessionSummary> {
        let Ok(dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut sessions = Vec::new();
        for item in dir.flatten() {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let scan = match log::scan_tail(&path) {
                Ok(scan) => scan,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable log");
                    continue;
                }
            };
            let Some(name) = scan.title else {
                // No user text within the tail cap: not listable.
                continue;
            };

            let updated_at = scan.updated_at.or_else(|| file_mtime_rfc3339(&path));
            sessions.push(SessionSummary {
                id: id.to_owned(),
                name,
                summary: scan.summary.unwrap_or_default(),
                updated_at,
            });
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    // ── path loading ─────────────────────────────────────────────────

    fn load_tree(&self, session_id: &str) -> Result<ConversationTree> {
        let path = self.session_path(session_id);
        if !path.is_file() {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        let entries = log::read_entries(&path)?;
        let tree = ConversationTree::from_entries(&entries);
        if tree.is_empty() {
            return Err(Error::NotFound(format!("session {session_id} has no entries")));
        }
        Ok(tree)
    }

    /// Root→leaf entries. With no `leaf_uuid`, the active (deepest) leaf
    /// is used.
    pub fn load_path(&self, session_id: &str, leaf_uuid: Option<&str>) -> Result<Vec<TreeEntry>> {
        let tree = self.load_tree(session_id)?;
        let leaf = match leaf_uuid {
            Some(uuid) => {
                if !tree.contains(uuid) {
                    return Err(Error::NotFound(format!("uuid {uuid} in session {session_id}")));
                }
                uuid.to_owned()
            }
            None => {
                tree.active_leaf()
                    .map(|l| l.uuid.clone())
                    .ok_or_else(|| Error::NotFound(format!("session {session_id} has no leaves")))?
            }
        };

        let mut path: Vec<TreeEntry> = tree.walk_path(&leaf).into_iter().cloned().collect();
        path.reverse();
        Ok(path)
    }

    /// The active path filtered to user/assistant messages, each tagged
    /// with its entry uuid. Unparseable messages are skipped.
    pub fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.load_path(session_id, None)?;
        let mut messages = Vec::new();
        for entry in &path {
            if !entry.kind.is_message() {
                continue;
            }
            let Some(mut message) = entry.parsed_message() else {
                continue;
            };
            message.uuid = Some(entry.uuid.clone());
            messages.push(message);
        }
        Ok(messages)
    }

    /// All leaves of a session, deepest first.
    pub fn leaves(&self, session_id: &str) -> Result<Vec<LeafInfo>> {
        let tree = self.load_tree(session_id)?;
        let active = tree.active_leaf().map(|l| l.uuid.clone());

        let mut leaves: Vec<LeafInfo> = tree
            .leaves()
            .into_iter()
            .map(|leaf| {
                let preview = leaf
                    .parsed_message()
                    .map(|m| match &m.content {
                        rd_domain::message::MessageContent::Text(text) => {
                            log::truncate_chars(text.trim(), 100)
                        }
                        rd_domain::message::MessageContent::Blocks(blocks) => {
                            preview_blocks(blocks)
                        }
                    })
                    .unwrap_or_default();
                LeafInfo {
                    uuid: leaf.uuid.clone(),
                    kind: leaf.kind,
                    depth: tree.depth(&leaf.uuid),
                    preview,
                    is_active: active.as_deref() == Some(leaf.uuid.as_str()),
                }
            })
            .collect();

        leaves.sort_by(|a, b| b.depth.cmp(&a.depth));
        Ok(leaves)
    }

    // ── fork ─────────────────────────────────────────────────────────

    /// Create a new session whose content is the root→`leaf_uuid` path of
    /// `session_id`. Writes only a new `<newId>.log`; the original file
    /// is never touched. Returns the new session id.
    pub fn fork(&self, session_id: &str, leaf_uuid: &str) -> Result<String> {
        let path = self.load_path(session_id, Some(leaf_uuid))?;

        let new_id = uuid::Uuid::new_v4().to_string();
        let mut lines = Vec::with_capacity(path.len() + 1);
        lines.push(serde_json::to_string(&Entry::queue_operation(
            &new_id,
            chrono::Utc::now(),
        ))?);
        for entry in path {
            let mut entry = entry;
            entry.session_id = new_id.clone();
            lines.push(serde_json::to_string(&Entry::Tree(entry))?);
        }

        let out = self.session_path(&new_id);
        std::fs::write(&out, lines.join("\n") + "\n")?;

        tracing::info!(
            from = session_id,
            leaf = leaf_uuid,
            to = %new_id,
            entries = lines.len() - 1,
            "forked session"
        );
        Ok(new_id)
    }
}

fn file_mtime_rfc3339(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let stamp: chrono::DateTime<chrono::Utc> = modified.into();
    Some(stamp.to_rfc3339())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
