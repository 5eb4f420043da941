//! OBD Assistant Dispatcher
//!
//! Ties an OBD-II adapter session, the query router and the generation
//! engine together behind one session context. Everything the caller needs
//! to render arrives, in order, on a single [`DispatchEvent`] channel.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod dispatcher;
mod display;
mod error;
mod event;
mod settings;

pub use dispatcher::Dispatcher;
pub use display::{DisplayBuffer, MAX_ROLLBACK};
pub use error::{DispatchError, ErrorKind};
pub use event::DispatchEvent;
pub use settings::{AssistantConfig, DisplayPolicy, ENV_PREFIX};

/// Corpus bundled with the binary, used when no corpus file is configured
pub fn default_corpus() -> Result<Vec<query_router::CorpusEntry>, DispatchError> {
    serde_json::from_str(include_str!("../assets/corpus.json"))
        .map_err(|e| DispatchError::Config(format!("bundled corpus: {}", e)))
}

/// Initialize logging on stderr, keeping stdout for the conversation
pub fn init_logging(config: &AssistantConfig) {
    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if config.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_corpus_parses() {
        let corpus = default_corpus().unwrap();
        assert!(!corpus.is_empty());
        assert!(corpus.iter().all(|entry| entry.code.len() >= 4));
    }
}
