//! The conversation tree: entries keyed by uuid, edges via `parentUuid`.
//!
//! The log is append-only, so the same uuid can occur more than once;
//! the last occurrence wins. Cycles are impossible by construction but
//! every walk carries a seen-set anyway — a corrupted log must not hang
//! the process.

use std::collections::{HashMap, HashSet};

use rd_domain::entry::{Entry, TreeEntry};

/// Index over the tree entries of one log.
pub struct ConversationTree {
    nodes: HashMap<String, TreeEntry>,
    /// Position of each uuid's last occurrence in the log (tie-breaks).
    order: HashMap<String, usize>,
    /// uuid → uuids of children.
    children: HashMap<String, Vec<String>>,
}

impl ConversationTree {
    /// Build the index from parsed log entries, in log order.
    pub fn from_entries(entries: &[Entry]) -> Self {
        let mut nodes: HashMap<String, TreeEntry> = HashMap::new();
        let mut order: HashMap<String, usize> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(tree) = entry.tree() {
                nodes.insert(tree.uuid.clone(), tree.clone());
                order.insert(tree.uuid.clone(), idx);
            }
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for node in nodes.values() {
            if let Some(ref parent) = node.parent_uuid {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(node.uuid.clone());
            }
        }

        Self {
            nodes,
            order,
            children,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, uuid: &str) -> Option<&TreeEntry> {
        self.nodes.get(uuid)
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.nodes.contains_key(uuid)
    }

    /// All nodes with no descendant.
    pub fn leaves(&self) -> Vec<&TreeEntry> {
        let mut leaves: Vec<&TreeEntry> = self
            .nodes
            .values()
            .filter(|n| !self.children.contains_key(&n.uuid))
            .collect();
        // Stable order: log position.
        leaves.sort_by_key(|n| self.order.get(&n.uuid).copied().unwrap_or(0));
        leaves
    }

    /// Path length from `uuid` to its root (1 for a root itself).
    pub fn depth(&self, uuid: &str) -> usize {
        self.walk_path(uuid).len()
    }

    /// The leaf with the greatest path depth to a root. Ties go to the
    /// leaf whose entry appears last in the log.
    pub fn active_leaf(&self) -> Option<&TreeEntry> {
        self.leaves()
            .into_iter()
            .max_by_key(|leaf| (self.depth(&leaf.uuid), self.order.get(&leaf.uuid).copied()))
    }

    /// Walk from `leaf` to its root following `parentUuid`.
    ///
    /// Returns leaf→root order (callers reverse as needed). Terminates on
    /// a missing parent or on cycle detection; the reported path is
    /// whatever prefix was reached.
    pub fn walk_path(&self, leaf: &str) -> Vec<&TreeEntry> {
        let mut path = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut cursor = leaf;

        loop {
            let Some(node) = self.nodes.get(cursor) else {
                break;
            };
            if !seen.insert(&node.uuid) {
                tracing::warn!(uuid = %node.uuid, "cycle in conversation tree, truncating walk");
                break;
            }
            path.push(node);
            match node.parent_uuid.as_deref() {
                Some(parent) => cursor = parent,
                None => break,
            }
        }

        path
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
