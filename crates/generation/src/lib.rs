//! Generative Response Path
//!
//! Streams cumulative snapshots from a language-model engine and merges them
//! into an append-only display without re-rendering unchanged text.

mod engine;
mod reconciler;

pub use engine::{GenerationSnapshot, Generator, MockGenerator, SNAPSHOT_CAPACITY};
pub use reconciler::{reconcile, Delta, StreamReconciler};

use thiserror::Error;

/// Errors from the generation engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Generation engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Generation failed: {0}")]
    Failed(String),
}
