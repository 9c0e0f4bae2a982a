// Vigil - Live File/Log Activity Monitor Library
//!
//! Vigil watches directories and tails log files by cooperative polling,
//! classifies activity against user-defined regex/fuzzy rules, and
//! republishes everything as a live event stream over a control socket
//! and an HTTP/SSE diagnostic server.

pub mod actions;
pub mod events;
pub mod monitor;
pub mod rules;
pub mod server;
pub mod state;
pub mod stats;

#[cfg(test)]
pub mod tests;

// Re-export common types
pub use events::{FileEvent, FileEventKind, LogLine, StreamEvent};
pub use monitor::Monitor;
pub use rules::{MatchKind, MatchRule, RuleHit};
pub use stats::FileStat;
