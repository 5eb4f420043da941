//! Adapter Reply Classification
//!
//! Two independent checks decide what a framed reply produces:
//! the raw framed text is tested for NO DATA, and the decoded narration is
//! tested for the invalid / no pid / no message markers.

use crate::pid::ResponseDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Notice shown whenever the adapter answers NO DATA
pub const NO_DATA_NOTICE: &str = "No data from OBD";

/// Default narration word count above which the narration is echoed
pub const DEFAULT_ECHO_MIN_WORDS: usize = 3;

/// Recognised reply classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentinel {
    /// Adapter reported NO DATA
    NoData,
    /// Decoder could not make sense of the reply
    Invalid,
    /// Decoder has no description for the requested PID
    NoPid,
    /// Nothing to decode
    NoMessage,
    /// Ordinary reply
    Valid,
}

impl Sentinel {
    /// Whether a narration of this class reaches the caller
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Sentinel::Valid)
    }
}

/// What one framed reply yields for the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// Class of the decoded narration
    pub sentinel: Sentinel,
    /// Set when the raw reply contained NO DATA
    pub notice: Option<&'static str>,
    /// Narration to forward, present only for valid replies
    pub narration: Option<String>,
    /// Plain-text echo of a long narration
    pub echo: Option<String>,
}

/// Reply classifier with the narration echo threshold
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    echo_min_words: usize,
}

impl ResponseClassifier {
    /// Create a classifier echoing narrations longer than `echo_min_words` words
    pub fn new(echo_min_words: usize) -> Self {
        Self { echo_min_words }
    }

    /// Classify a single text in fixed precedence order
    pub fn classify(&self, text: &str) -> Sentinel {
        if contains_no_data(text) {
            Sentinel::NoData
        } else {
            classify_narration(text)
        }
    }

    /// Run both checks on a framed reply: NO DATA on `raw`, markers on its narration
    pub fn assess(&self, raw: &str, decoder: &dyn ResponseDecoder) -> Assessment {
        let notice = contains_no_data(raw).then_some(NO_DATA_NOTICE);

        let narration = decoder.decode(raw);
        let sentinel = classify_narration(&narration);
        debug!("Reply {:?} decoded as {:?} ({:?})", raw, narration, sentinel);

        if !sentinel.is_forwarded() {
            return Assessment {
                sentinel,
                notice,
                narration: None,
                echo: None,
            };
        }

        let echo = (narration.split_whitespace().count() > self.echo_min_words)
            .then(|| narration.clone());

        Assessment {
            sentinel,
            notice,
            narration: Some(narration),
            echo,
        }
    }
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_MIN_WORDS)
    }
}

fn contains_no_data(text: &str) -> bool {
    text.to_lowercase().contains("no data")
}

fn classify_narration(text: &str) -> Sentinel {
    let lower = text.to_lowercase();
    if lower.contains("invalid") {
        Sentinel::Invalid
    } else if lower.contains("no pid") {
        Sentinel::NoPid
    } else if lower.contains("no message") {
        Sentinel::NoMessage
    } else {
        Sentinel::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl ResponseDecoder for Fixed {
        fn decode(&self, _raw: &str) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_classify_precedence() {
        let classifier = ResponseClassifier::default();
        assert_eq!(classifier.classify("NO DATA"), Sentinel::NoData);
        assert_eq!(classifier.classify("no data, invalid"), Sentinel::NoData);
        assert_eq!(classifier.classify("Invalid response"), Sentinel::Invalid);
        assert_eq!(classifier.classify("No PID description"), Sentinel::NoPid);
        assert_eq!(classifier.classify("NO MESSAGE"), Sentinel::NoMessage);
        assert_eq!(classifier.classify("Vehicle speed: 85 km/h"), Sentinel::Valid);
        assert_eq!(classifier.classify(""), Sentinel::Valid);
    }

    #[test]
    fn test_no_data_notice_ignores_narration() {
        let classifier = ResponseClassifier::default();

        let assessment = classifier.assess("NO DATA^M>", &Fixed("Engine speed is 900 rpm"));
        assert_eq!(assessment.notice, Some(NO_DATA_NOTICE));
        assert_eq!(assessment.sentinel, Sentinel::Valid);

        let assessment = classifier.assess("NO DATA^M>", &Fixed("Invalid response"));
        assert_eq!(assessment.notice, Some(NO_DATA_NOTICE));
        assert_eq!(assessment.narration, None);
    }

    #[test]
    fn test_suppressed_narrations() {
        let classifier = ResponseClassifier::default();
        for narration in ["Invalid response: zz", "No PID description for 01FF", "No message"] {
            let assessment = classifier.assess("41 FF 00", &Fixed(narration));
            assert!(!assessment.sentinel.is_forwarded());
            assert_eq!(assessment.narration, None);
            assert_eq!(assessment.echo, None);
            assert_eq!(assessment.notice, None);
        }
    }

    #[test]
    fn test_echo_only_above_word_threshold() {
        let classifier = ResponseClassifier::default();

        let short = classifier.assess("41 0D 55", &Fixed("Speed 85 km/h"));
        assert_eq!(short.narration.as_deref(), Some("Speed 85 km/h"));
        assert_eq!(short.echo, None);

        let long = classifier.assess("41 0D 55", &Fixed("Vehicle speed: 85 km/h"));
        assert_eq!(long.echo.as_deref(), Some("Vehicle speed: 85 km/h"));
    }
}
