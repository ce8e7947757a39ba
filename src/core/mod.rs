//! Core primitives.
//!
//! Board addressing and deterministic state fingerprints. Nothing here
//! knows about connections or matches.

pub mod coord;
pub mod hash;

// Re-export core types
pub use coord::Coord;
pub use hash::{StateHash, compute_state_hash};
