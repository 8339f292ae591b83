//! Audio routing graph access
//!
//! This module talks to the system's port graph:
//! - PortGraph trait over the external link utility (and an in-memory graph)
//! - PortDirectory for existence and duplicate questions
//! - ConnectionManager for retried source-to-encoder links

pub mod connect;
pub mod directory;
pub mod graph;
pub mod memory;

pub use connect::{is_ephemeral_port, ConnectionManager, RetryPolicy};
pub use directory::{count_occurrences, PortDirectory, PortSnapshot, SourceState};
pub use graph::{PortGraph, PwLink};
pub use memory::MemoryGraph;
