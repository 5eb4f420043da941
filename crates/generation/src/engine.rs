//! Generation Engine Boundary

use crate::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Capacity of a turn's snapshot channel
pub const SNAPSHOT_CAPACITY: usize = 32;

/// Everything generated so far in one call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    /// Full cumulative text, replacing any earlier snapshot
    pub text: String,
    /// Whether this is the final snapshot of the call
    pub done: bool,
}

impl GenerationSnapshot {
    /// Create a snapshot
    pub fn new(text: impl Into<String>, done: bool) -> Self {
        Self {
            text: text.into(),
            done,
        }
    }
}

/// Language-model engine producing cumulative snapshots
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start generating for `prompt`. Snapshots arrive on the returned channel;
    /// dropping the receiver cancels delivery.
    async fn generate(&self, prompt: &str) -> Result<mpsc::Receiver<GenerationSnapshot>, GenerationError>;
}

#[derive(Debug, Clone)]
enum Script {
    /// Reply template; `{prompt}` is replaced, then streamed word by word
    Template(String),
    /// Exact snapshots to deliver in order
    Snapshots(Vec<String>),
}

/// Scripted engine for tests and model-free runs
#[derive(Debug, Clone)]
pub struct MockGenerator {
    script: Script,
    delay: Duration,
    unavailable: Option<String>,
    /// Producer tasks still running, shared by clones
    streams: Arc<AtomicUsize>,
}

impl MockGenerator {
    /// Create a mock engine with a generic mechanic-style reply
    pub fn new() -> Self {
        info!("Creating mock generation engine");
        Self::with_reply("I can only guess without a model, but \"{prompt}\" is worth checking with a mechanic.")
    }

    /// Stream `template` word by word, with `{prompt}` substituted
    pub fn with_reply(template: &str) -> Self {
        Self {
            script: Script::Template(template.to_string()),
            delay: Duration::ZERO,
            unavailable: None,
            streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deliver exactly these snapshots, the last one marked done
    pub fn scripted<I, S>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Script::Snapshots(snapshots.into_iter().map(Into::into).collect()),
            delay: Duration::ZERO,
            unavailable: None,
            streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pause before each snapshot
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Refuse every call with `reason`
    pub fn unavailable(mut self, reason: &str) -> Self {
        self.unavailable = Some(reason.to_string());
        self
    }

    /// Number of snapshot producers that have not finished
    pub fn active_streams(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    fn snapshots(&self, prompt: &str) -> Vec<String> {
        match &self.script {
            Script::Snapshots(snapshots) => snapshots.clone(),
            Script::Template(template) => {
                let reply = template.replace("{prompt}", prompt);
                let mut cumulative = String::new();
                reply
                    .split_inclusive(' ')
                    .map(|word| {
                        cumulative.push_str(word);
                        cumulative.clone()
                    })
                    .collect()
            }
        }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<mpsc::Receiver<GenerationSnapshot>, GenerationError> {
        if let Some(reason) = &self.unavailable {
            return Err(GenerationError::EngineUnavailable(reason.clone()));
        }

        let snapshots = self.snapshots(prompt);
        let delay = self.delay;
        let (tx, rx) = mpsc::channel(SNAPSHOT_CAPACITY);
        let streams = self.streams.clone();
        debug!("Mock generation of {} snapshots", snapshots.len());

        streams.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let last = snapshots.len().saturating_sub(1);
            for (i, text) in snapshots.into_iter().enumerate() {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(GenerationSnapshot::new(text, i == last)).await.is_err() {
                    debug!("Snapshot receiver dropped, stopping mock generation");
                    break;
                }
            }
            streams.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(rx)
    }
}
