//! Entity state ownership
//!
//! Handles:
//! - Versioned storage of swaps, transfers and proofs
//! - Per-id serialization of state transitions
//! - Domain event emission on every accepted write

mod registry;
mod store;

pub use registry::{Registry, Tracked};
pub use store::{EntityStore, InMemoryStore, Versioned};
