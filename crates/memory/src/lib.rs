//! Storage backends for Cadence.
//!
//! The runtime talks to persistence only through
//! [`cadence_core::memory::MemoryStore`]; this crate ships the in-process
//! reference backend used by tests and the CLI.

pub mod in_memory;
pub mod vector;

pub use in_memory::InMemoryStore;
pub use vector::{cosine_similarity, rank_by_similarity};
