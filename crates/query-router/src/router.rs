//! Query Router Implementation

use crate::oracle::{CommandMatch, SimilarityOracle};
use crate::RouteError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Width of an outgoing diagnostic command (mode + PID, e.g. `010C`)
pub const DEFAULT_COMMAND_WIDTH: usize = 4;

/// Where an utterance goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteDecision {
    /// Send this command to the adapter
    ToTransport { command: String },
    /// Hand the utterance to the generation engine
    ToGeneration { prompt: String },
    /// Nothing to do: no match and no token to generate from
    Discard,
}

/// Routes utterances using a similarity oracle
pub struct QueryRouter {
    oracle: Arc<dyn SimilarityOracle>,
    command_width: usize,
}

impl QueryRouter {
    /// Create a router truncating matched codes to `command_width` characters
    pub fn new(oracle: Arc<dyn SimilarityOracle>, command_width: usize) -> Self {
        Self {
            oracle,
            command_width,
        }
    }

    /// Ask the oracle about `utterance` and decide where it goes
    pub fn route(&self, utterance: &str) -> Result<RouteDecision, RouteError> {
        let found = self.oracle.best_match(utterance);
        debug!("Oracle answered {:?} for {:?}", found, utterance);
        self.decide(utterance, found)
    }

    /// Decide from an already computed match
    pub fn decide(&self, utterance: &str, found: CommandMatch) -> Result<RouteDecision, RouteError> {
        match found {
            CommandMatch::Matched { code } => {
                if code.chars().count() < self.command_width {
                    warn!("Oracle code {:?} is shorter than {} characters", code, self.command_width);
                    return Err(RouteError::MalformedCommandCode {
                        code,
                        width: self.command_width,
                    });
                }
                let command: String = code.chars().take(self.command_width).collect();
                Ok(RouteDecision::ToTransport { command })
            }
            CommandMatch::NoMatch if utterance.split_whitespace().next().is_some() => {
                Ok(RouteDecision::ToGeneration {
                    prompt: utterance.to_string(),
                })
            }
            CommandMatch::NoMatch => Ok(RouteDecision::Discard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{ReplyOracle, NO_MATCH_FOUND};
    use proptest::prelude::*;

    struct Fixed(CommandMatch);

    impl SimilarityOracle for Fixed {
        fn best_match(&self, _text: &str) -> CommandMatch {
            self.0.clone()
        }
    }

    fn router(found: CommandMatch) -> QueryRouter {
        QueryRouter::new(Arc::new(Fixed(found)), DEFAULT_COMMAND_WIDTH)
    }

    fn matched(code: &str) -> CommandMatch {
        CommandMatch::Matched {
            code: code.to_string(),
        }
    }

    #[test]
    fn test_match_truncates_to_command_width() {
        let decision = router(matched("010Cxx")).route("read engine rpm").unwrap();
        assert_eq!(decision, RouteDecision::ToTransport { command: "010C".to_string() });
    }

    #[test]
    fn test_exact_width_code() {
        let decision = router(matched("010D")).route("check vehicle speed").unwrap();
        assert_eq!(decision, RouteDecision::ToTransport { command: "010D".to_string() });
    }

    #[test]
    fn test_no_match_goes_to_generation() {
        let decision = router(CommandMatch::NoMatch).route("why is coolant important").unwrap();
        assert_eq!(
            decision,
            RouteDecision::ToGeneration { prompt: "why is coolant important".to_string() }
        );
    }

    #[test]
    fn test_textual_no_match_goes_to_generation() {
        let router = QueryRouter::new(
            Arc::new(ReplyOracle::new(|_: &str| Some(NO_MATCH_FOUND.to_string()))),
            DEFAULT_COMMAND_WIDTH,
        );
        assert_eq!(
            router.route("is my battery ok").unwrap(),
            RouteDecision::ToGeneration { prompt: "is my battery ok".to_string() }
        );
    }

    #[test]
    fn test_blank_utterance_is_discarded() {
        assert_eq!(router(CommandMatch::NoMatch).route("   \t").unwrap(), RouteDecision::Discard);
        assert_eq!(router(CommandMatch::NoMatch).route("").unwrap(), RouteDecision::Discard);
    }

    #[test]
    fn test_short_code_is_malformed() {
        let err = router(matched("01C")).route("read engine rpm").unwrap_err();
        assert_eq!(
            err,
            RouteError::MalformedCommandCode { code: "01C".to_string(), width: 4 }
        );
    }

    #[test]
    fn test_width_counts_characters() {
        let decision = router(matched("0éC€x")).route("odd").unwrap();
        assert_eq!(decision, RouteDecision::ToTransport { command: "0éC€".to_string() });
    }

    proptest! {
        #[test]
        fn matched_codes_never_exceed_width(code in "[0-9A-F]{4,12}", utterance in ".*") {
            let decision = router(matched(&code)).route(&utterance).unwrap();
            prop_assert_eq!(decision, RouteDecision::ToTransport { command: code[..4].to_string() });
        }
    }
}
