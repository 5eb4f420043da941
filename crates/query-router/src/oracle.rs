//! Similarity Oracle
//!
//! Nearest-neighbour lookup of an utterance against a corpus of
//! `{code, sentence}` pairs. The embedding model itself sits behind
//! [`Embedder`]; a small feature-hashing embedder is bundled for offline use.

use crate::RouteError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Legacy textual reply meaning "nothing close enough"
pub const NO_MATCH_FOUND: &str = "No match found";

/// Minimum cosine similarity for a corpus sentence to count as a match
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Result of a semantic lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandMatch {
    /// Closest corpus entry's command code
    Matched { code: String },
    /// Nothing at or above the threshold
    NoMatch,
}

impl CommandMatch {
    /// Interpret a textual oracle reply, where absence, `"No match found"`
    /// and `"Error: ..."` all mean no match
    pub fn from_reply(reply: Option<&str>) -> Self {
        match reply {
            None => CommandMatch::NoMatch,
            Some(text) if text == NO_MATCH_FOUND || text.starts_with("Error:") => {
                CommandMatch::NoMatch
            }
            Some(code) => CommandMatch::Matched {
                code: code.to_string(),
            },
        }
    }
}

/// Synchronous lookup over the current corpus snapshot
pub trait SimilarityOracle: Send + Sync {
    /// Closest known command for `text`
    fn best_match(&self, text: &str) -> CommandMatch;
}

/// Oracle over a lookup that answers in text: a command code,
/// [`NO_MATCH_FOUND`], `"Error: ..."`, or nothing at all
pub struct ReplyOracle<F> {
    lookup: F,
}

impl<F> ReplyOracle<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }
}

impl<F> SimilarityOracle for ReplyOracle<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn best_match(&self, text: &str) -> CommandMatch {
        let reply = (self.lookup)(text);
        debug!("Lookup replied {:?} for {:?}", reply, text);
        CommandMatch::from_reply(reply.as_deref())
    }
}

/// One corpus sentence and the command it stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub code: String,
    pub sentence: String,
}

/// Load a JSON array of corpus entries
pub fn load_corpus(path: impl AsRef<Path>) -> Result<Vec<CorpusEntry>, RouteError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| RouteError::Corpus(format!("{}: {}", path.display(), e)))?;
    let entries: Vec<CorpusEntry> =
        serde_json::from_str(&raw).map_err(|e| RouteError::Corpus(format!("{}: {}", path.display(), e)))?;
    info!("Loaded {} corpus entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Sentence embedding model
pub trait Embedder: Send + Sync {
    /// Embed one sentence
    fn embed(&self, text: &str) -> Result<Vec<f32>, RouteError>;
}

/// Bag-of-words embedder hashing tokens into a fixed number of buckets
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Create an embedder with `dimensions` buckets (minimum 1)
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// FNV-1a, stable across runs and platforms
    fn bucket(&self, token: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RouteError> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();
        for token in lower.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            vector[self.bucket(token)] += 1.0;
        }
        Ok(vector)
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Oracle comparing utterance embeddings against pre-embedded corpus sentences
pub struct EmbeddingOracle<E> {
    embedder: E,
    entries: Vec<(CorpusEntry, Vec<f32>)>,
    threshold: f64,
}

impl<E: Embedder> EmbeddingOracle<E> {
    /// Embed every corpus sentence once, up front
    pub fn load(embedder: E, corpus: Vec<CorpusEntry>, threshold: f64) -> Result<Self, RouteError> {
        let mut entries = Vec::with_capacity(corpus.len());
        for entry in corpus {
            let embedding = embedder.embed(&entry.sentence.to_lowercase())?;
            entries.push((entry, embedding));
        }
        info!(
            "Similarity oracle ready: {} sentences, threshold {}",
            entries.len(),
            threshold
        );
        Ok(Self {
            embedder,
            entries,
            threshold,
        })
    }
}

impl<E: Embedder> SimilarityOracle for EmbeddingOracle<E> {
    fn best_match(&self, text: &str) -> CommandMatch {
        let query = match self.embedder.embed(&text.to_lowercase()) {
            Ok(query) => query,
            Err(e) => {
                warn!("Embedding failed, treating as no match: {}", e);
                return CommandMatch::NoMatch;
            }
        };

        let mut best: Option<(&CorpusEntry, f64)> = None;
        for (entry, embedding) in &self.entries {
            let similarity = cosine_similarity(&query, embedding);
            if similarity < self.threshold {
                continue;
            }
            // first of equal scores wins
            if best.map_or(true, |(_, score)| similarity > score) {
                best = Some((entry, similarity));
            }
        }

        match best {
            Some((entry, similarity)) => {
                debug!(
                    "Most similar sentence: {:?} -> {} ({:.3})",
                    entry.sentence, entry.code, similarity
                );
                CommandMatch::Matched {
                    code: entry.code.clone(),
                }
            }
            None => {
                debug!("No corpus sentence above threshold for {:?}", text);
                CommandMatch::NoMatch
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<CorpusEntry> {
        [
            ("010C", "Read engine rpm"),
            ("010C", "Show current RPM"),
            ("010D", "Read vehicle speed"),
            ("0105", "What is the coolant temperature?"),
        ]
        .into_iter()
        .map(|(code, sentence)| CorpusEntry {
            code: code.to_string(),
            sentence: sentence.to_string(),
        })
        .collect()
    }

    fn oracle() -> EmbeddingOracle<HashingEmbedder> {
        EmbeddingOracle::load(HashingEmbedder::default(), corpus(), DEFAULT_SIMILARITY_THRESHOLD).unwrap()
    }

    struct Broken;

    impl Embedder for Broken {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, RouteError> {
            Err(RouteError::Embedding("model not loaded".to_string()))
        }
    }

    #[test]
    fn test_exact_sentence_matches() {
        let oracle = oracle();
        assert_eq!(
            oracle.best_match("read engine RPM"),
            CommandMatch::Matched { code: "010C".to_string() }
        );
        assert_eq!(
            oracle.best_match("What is the coolant temperature"),
            CommandMatch::Matched { code: "0105".to_string() }
        );
    }

    #[test]
    fn test_free_text_does_not_match() {
        let oracle = oracle();
        assert_eq!(oracle.best_match("why is coolant important"), CommandMatch::NoMatch);
        assert_eq!(oracle.best_match(""), CommandMatch::NoMatch);
    }

    #[test]
    fn test_embedding_failure_is_no_match() {
        let oracle = EmbeddingOracle {
            embedder: Broken,
            entries: Vec::new(),
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        };
        assert_eq!(oracle.best_match("read engine rpm"), CommandMatch::NoMatch);
        assert!(EmbeddingOracle::load(Broken, corpus(), 0.9).is_err());
    }

    #[test]
    fn test_textual_replies() {
        assert_eq!(CommandMatch::from_reply(None), CommandMatch::NoMatch);
        assert_eq!(CommandMatch::from_reply(Some(NO_MATCH_FOUND)), CommandMatch::NoMatch);
        assert_eq!(CommandMatch::from_reply(Some("Error: timeout")), CommandMatch::NoMatch);
        assert_eq!(
            CommandMatch::from_reply(Some("010D")),
            CommandMatch::Matched { code: "010D".to_string() }
        );
    }

    #[test]
    fn test_reply_oracle_interprets_text() {
        let oracle = ReplyOracle::new(|text: &str| match text {
            "get car speed" => Some("010D".to_string()),
            "timeout" => Some("Error: lookup timed out".to_string()),
            "silence" => None,
            _ => Some(NO_MATCH_FOUND.to_string()),
        });
        assert_eq!(oracle.best_match("get car speed"), CommandMatch::Matched { code: "010D".to_string() });
        assert_eq!(oracle.best_match("timeout"), CommandMatch::NoMatch);
        assert_eq!(oracle.best_match("silence"), CommandMatch::NoMatch);
        assert_eq!(oracle.best_match("why is coolant important"), CommandMatch::NoMatch);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_corpus_file() {
        let path = std::env::temp_dir().join(format!("corpus-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"code": "010D", "sentence": "Get car speed"}]"#).unwrap();
        let entries = load_corpus(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(entries, vec![CorpusEntry { code: "010D".to_string(), sentence: "Get car speed".to_string() }]);

        assert!(matches!(load_corpus("/nonexistent/corpus.json"), Err(RouteError::Corpus(_))));
    }
}
