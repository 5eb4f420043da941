//! Assistant Configuration
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `OBD_ASSISTANT_*` environment variables (`__` separates nested keys).

use crate::DispatchError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "OBD_ASSISTANT";

/// What happens to the display when a new generation turn starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPolicy {
    /// Keep accumulating for the whole session
    #[default]
    Persist,
    /// Clear the display at every turn
    ResetPerTurn,
}

/// Assistant configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Serial device of the adapter; unset runs against the built-in mock adapter
    pub device: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Minimum cosine similarity for a diagnostic command match
    pub similarity_threshold: f64,
    /// Characters of a matched code sent as the command
    pub command_width: usize,
    /// Narrations with more words than this are echoed
    pub echo_min_words: usize,
    /// Display behaviour across generation turns
    pub display_policy: DisplayPolicy,
    /// JSON corpus of `{code, sentence}` entries; unset uses the bundled one
    pub corpus_path: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON
    pub log_json: bool,
    /// Appended to every command written to the adapter
    pub line_terminator: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: 38400,
            similarity_threshold: query_router::DEFAULT_SIMILARITY_THRESHOLD,
            command_width: query_router::DEFAULT_COMMAND_WIDTH,
            echo_min_words: obd_protocol::DEFAULT_ECHO_MIN_WORDS,
            display_policy: DisplayPolicy::Persist,
            corpus_path: None,
            log_level: "info".to_string(),
            log_json: false,
            line_terminator: "\r\n".to_string(),
        }
    }
}

impl AssistantConfig {
    /// Load defaults, then `path` if given and present, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, DispatchError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Reading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(false));
        }
        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DispatchError> {
        if self.command_width == 0 {
            return Err(DispatchError::Config("command_width must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(DispatchError::Config(format!(
                "similarity_threshold {} is outside 0..=1",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}
