//! Simulation layers driven by the orchestrator.
//!
//! Layers are independent; composition (speech → noise mix → network →
//! adapter) happens in the dispatcher. Every layer accepts the shared
//! clock via `set_clock` and paces its output through it.

pub mod audio;
pub mod barge_in;
pub mod network;
pub mod noise;
pub mod physical;
pub mod video;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Stable seed derived from a name (scene, noise source, text) so that
/// synthesized content is deterministic for a given input.
pub(crate) fn name_seed(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}
