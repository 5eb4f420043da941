//! Incremental Output Reconciliation
//!
//! Each snapshot carries the whole text generated so far. When it extends the
//! previous snapshot only the new suffix is appended; anything else starts a
//! new block.

use crate::engine::GenerationSnapshot;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Change to apply to the display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delta {
    /// Continue the current block with `text`
    Append { text: String },
    /// Start a new block containing `text`
    Replace { text: String },
}

impl Delta {
    /// Whether applying this delta changes nothing
    pub fn is_noop(&self) -> bool {
        matches!(self, Delta::Append { text } if text.is_empty())
    }

    /// Text to append to the display; a new block is separated by a line break
    pub fn rendered(&self) -> String {
        match self {
            Delta::Append { text } => text.clone(),
            Delta::Replace { text } => format!("\n{}", text),
        }
    }
}

/// Compare `incoming` with `previous` on whole text units
pub fn reconcile(previous: &str, incoming: &str) -> Delta {
    match incoming.strip_prefix(previous) {
        Some(suffix) => Delta::Append {
            text: suffix.to_string(),
        },
        None => Delta::Replace {
            text: incoming.to_string(),
        },
    }
}

/// Remembers the last snapshot of the stream being merged
#[derive(Debug, Default)]
pub struct StreamReconciler {
    previous: String,
}

impl StreamReconciler {
    /// Create a reconciler with an empty baseline
    pub fn new() -> Self {
        Self::default()
    }

    /// Last snapshot text merged
    pub fn previous(&self) -> &str {
        &self.previous
    }

    /// Forget the baseline
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Merge `snapshot`, making it the new baseline.
    /// An empty snapshot is a no-op and leaves the baseline alone.
    pub fn apply(&mut self, snapshot: &GenerationSnapshot) -> Delta {
        if snapshot.text.is_empty() {
            return Delta::Append {
                text: String::new(),
            };
        }
        let delta = reconcile(&self.previous, &snapshot.text);
        if let Delta::Replace { .. } = delta {
            debug!("Snapshot does not extend previous output, starting a new block");
        }
        self.previous.clone_from(&snapshot.text);
        delta
    }
}
