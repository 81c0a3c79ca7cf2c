//! Conversation store: parses the agent's append-only conversation logs,
//! walks the uuid-linked tree, produces previews, and forks a branch by
//! writing a new log containing only a chosen root→leaf path.
//!
//! Log files are read-only to this crate except for `fork`, which only
//! ever creates new files.

pub mod log;
pub mod preview;
pub mod store;
pub mod tree;

pub use store::{ConversationStore, LeafInfo, SessionSummary};
pub use tree::ConversationTree;
