//! Display Buffer
//!
//! Append-only text, except for a bounded rollback of the last few
//! characters used to retract a rendered carriage return.

use generation::Delta;
use obd_protocol::CR_CARET;

/// Most characters a single rollback may remove
pub const MAX_ROLLBACK: usize = 2;

/// Accumulated visible text
#[derive(Debug, Default, Clone)]
pub struct DisplayBuffer {
    text: String,
}

impl DisplayBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text as is
    pub fn push(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Merge a generation delta
    pub fn apply(&mut self, delta: &Delta) {
        if !delta.is_noop() {
            self.text.push_str(&delta.rendered());
        }
    }

    /// Remove up to `chars` trailing characters (capped at [`MAX_ROLLBACK`]);
    /// returns how many were removed
    pub fn rollback(&mut self, chars: usize) -> usize {
        let mut removed = 0;
        while removed < chars.min(MAX_ROLLBACK) && self.text.pop().is_some() {
            removed += 1;
        }
        removed
    }

    /// Retract a trailing rendered CR so the following LF can replace it
    pub fn retract_pending_cr(&mut self) -> bool {
        if self.text.ends_with(CR_CARET) {
            self.rollback(CR_CARET.len()) == CR_CARET.len()
        } else {
            false
        }
    }

    /// Drop everything shown so far
    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Text shown so far
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True when nothing has been shown
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_is_bounded() {
        let mut buffer = DisplayBuffer::new();
        buffer.push("41 0C^M");
        assert_eq!(buffer.rollback(5), 2);
        assert_eq!(buffer.as_str(), "41 0C");
    }

    #[test]
    fn test_rollback_counts_characters() {
        let mut buffer = DisplayBuffer::new();
        buffer.push("90°C");
        assert_eq!(buffer.rollback(2), 2);
        assert_eq!(buffer.as_str(), "90");
        assert_eq!(DisplayBuffer::new().rollback(2), 0);
    }

    #[test]
    fn test_retract_only_rendered_cr() {
        let mut buffer = DisplayBuffer::new();
        buffer.push("SEARCHING...^M");
        assert!(buffer.retract_pending_cr());
        assert_eq!(buffer.as_str(), "SEARCHING...");
        assert!(!buffer.retract_pending_cr());
        assert_eq!(buffer.as_str(), "SEARCHING...");
    }

    #[test]
    fn test_apply_deltas() {
        let mut buffer = DisplayBuffer::new();
        buffer.apply(&Delta::Append { text: "Coolant ".to_string() });
        buffer.apply(&Delta::Append { text: String::new() });
        buffer.apply(&Delta::Replace { text: "Oil".to_string() });
        assert_eq!(buffer.as_str(), "Coolant \nOil");
    }
}
