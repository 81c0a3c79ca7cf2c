//! Agent bridge: one subprocess per converse call.
//!
//! Streams an instruction to the agent CLI, normalizes its heterogeneous
//! stream-JSON events into a uniform [`Chunk`](rd_domain::Chunk)
//! sequence, and emits a terminal result carrying session identity.

pub mod converse;
pub mod event;

pub use converse::{build_args, AgentBridge};
