//! Shared domain types for reduck.
//!
//! Everything the other crates exchange lives here: conversation content
//! blocks and messages, persisted log entries, the converse chunk/wire
//! vocabulary, configuration, and the common error type.

pub mod chunk;
pub mod config;
pub mod entry;
pub mod error;
pub mod message;

pub use chunk::{Chunk, ConverseOptions, ConverseRequest, ConverseResult, PermissionMode};
pub use config::Config;
pub use entry::{Entry, TreeEntry, TreeKind};
pub use error::{Error, Result};
pub use message::{ContentBlock, ImageSource, Message, MessageContent, Role, ToolResultContent};
