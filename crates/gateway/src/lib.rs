//! Stream relay: the HTTP surface that accepts converse requests,
//! optionally forks the conversation at a chosen node, and re-emits
//! agent bridge chunks as newline-delimited SSE events.

pub mod api;
pub mod cli;
pub mod state;
