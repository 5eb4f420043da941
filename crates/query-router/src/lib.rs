//! Hybrid Query Routing
//!
//! Classifies each utterance as a known diagnostic command (nearest-neighbour
//! match against a fixed corpus) or free-form text for the generation path.

mod oracle;
mod router;

pub use oracle::{
    cosine_similarity, load_corpus, CommandMatch, CorpusEntry, Embedder, EmbeddingOracle,
    HashingEmbedder, ReplyOracle, SimilarityOracle, DEFAULT_SIMILARITY_THRESHOLD, NO_MATCH_FOUND,
};
pub use router::{QueryRouter, RouteDecision, DEFAULT_COMMAND_WIDTH};

use thiserror::Error;

/// Errors during routing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("Oracle returned code {code:?}, shorter than the {width}-character command width")]
    MalformedCommandCode { code: String, width: usize },
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Corpus load failed: {0}")]
    Corpus(String),
}
