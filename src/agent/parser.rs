//! Parsing of raw completions into loop decisions.
//!
//! The model is prompted to end every turn with
//!
//! ```text
//! Action: <tool name>
//! Action Input: <python literal>
//! ```
//!
//! or, when it is done, `Action: Finish` followed by the answer. Anything
//! before the `Action:` line is kept as the step's thought.

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::literal::{DecodeError, LiteralDecoder};
use super::truncate_for_log;

/// Reserved action name that ends the loop.
pub const FINISH_ACTION: &str = "Finish";

/// Why a completion could not be turned into an action or a finish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// The text does not contain the `Action:` / `Action Input:` lines.
    #[error("completion does not match the `Action:` / `Action Input:` format")]
    Structural,

    /// The grammar matched but the action input is not a literal.
    #[error("action input is not a literal: {0}")]
    LiteralDecode(#[from] DecodeError),
}

impl ParseFailure {
    /// Stable tag for structured log fields.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::LiteralDecode(_) => "literal_decode",
        }
    }
}

/// What the loop should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Invoke tool `name` with `input`.
    Action {
        name: String,
        input: Value,
        thought: String,
    },
    /// Stop and return `output`.
    Finish { output: String, thought: String },
    /// The completion could not be parsed.
    Malformed {
        raw_text: String,
        cause: ParseFailure,
    },
}

/// Converts completion text into a [`Decision`].
#[derive(Debug, Clone)]
pub struct ActionTextParser {
    pattern: Regex,
    decoder: LiteralDecoder,
}

impl Default for ActionTextParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionTextParser {
    pub fn new() -> Self {
        // The name runs to the end of its line; the input runs to the end of the text.
        let pattern = Regex::new(r"Action:([^\n]*)\nAction Input:(?s:(.*))")
            .unwrap_or_else(|e| unreachable!("action pattern is valid: {e}"));
        Self {
            pattern,
            decoder: LiteralDecoder::new(),
        }
    }

    /// Parse one completion.
    ///
    /// Never fails: unparseable text comes back as [`Decision::Malformed`]
    /// so the caller decides whether to retry or give up.
    pub fn parse(&self, raw_text: &str) -> Decision {
        let Some(captures) = self.pattern.captures(raw_text) else {
            return self.malformed(raw_text, ParseFailure::Structural);
        };

        let (Some(whole), Some(name), Some(input)) =
            (captures.get(0), captures.get(1), captures.get(2))
        else {
            return self.malformed(raw_text, ParseFailure::Structural);
        };

        let thought = extract_thought(&raw_text[..whole.start()]);
        let name = name.as_str().trim();
        let input = input.as_str();

        if name == FINISH_ACTION {
            return Decision::Finish {
                output: input.strip_prefix(' ').unwrap_or(input).to_string(),
                thought,
            };
        }

        match self.decoder.decode(input) {
            Ok(value) => Decision::Action {
                name: name.to_string(),
                input: value,
                thought,
            },
            Err(e) => self.malformed(raw_text, ParseFailure::LiteralDecode(e)),
        }
    }

    fn malformed(&self, raw_text: &str, cause: ParseFailure) -> Decision {
        tracing::warn!(
            cause = cause.tag(),
            error = %cause,
            text = %truncate_for_log(raw_text, 500),
            "Could not parse completion"
        );
        Decision::Malformed {
            raw_text: raw_text.to_string(),
            cause,
        }
    }
}

/// The reasoning that precedes `Action:`, without a leading `Thought:` label.
fn extract_thought(prefix: &str) -> String {
    let prefix = prefix.trim();
    prefix
        .strip_prefix("Thought:")
        .unwrap_or(prefix)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> Decision {
        ActionTextParser::new().parse(text)
    }

    #[test]
    fn parses_action_with_mapping_input() {
        let decision = parse("I should add them.\nAction: calc\nAction Input: {'a':2,'b':2}");
        assert_eq!(
            decision,
            Decision::Action {
                name: "calc".to_string(),
                input: json!({"a": 2, "b": 2}),
                thought: "I should add them.".to_string(),
            }
        );
    }

    #[test]
    fn strips_whitespace_around_name() {
        let decision = parse("Action:   search  \nAction Input: 'ESG lectures'");
        match decision {
            Decision::Action { name, input, .. } => {
                assert_eq!(name, "search");
                assert_eq!(input, json!("ESG lectures"));
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn multi_line_input_is_decoded() {
        let decision = parse("Action: search\nAction Input: {\n  'query': 'rust',\n  'limit': 3\n}\n");
        match decision {
            Decision::Action { input, .. } => assert_eq!(input, json!({"query": "rust", "limit": 3})),
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn finish_keeps_output_verbatim() {
        assert_eq!(
            parse("Action: Finish\nAction Input: 4"),
            Decision::Finish {
                output: "4".to_string(),
                thought: String::new(),
            }
        );

        let answer = "The answer is:\n  - four\n  - {not a literal}\n";
        let decision = parse(&format!("Thought: I now know the final answer\nAction: Finish\nAction Input: {answer}"));
        assert_eq!(
            decision,
            Decision::Finish {
                output: answer.to_string(),
                thought: "I now know the final answer".to_string(),
            }
        );
    }

    #[test]
    fn missing_grammar_is_structural_failure() {
        for text in [
            "",
            "I think the answer is 4.",
            "Action: calc",
            "Action: calc Action Input: 1",
            "action: calc\naction input: 1",
            "Final Answer: 4",
        ] {
            match parse(text) {
                Decision::Malformed { raw_text, cause } => {
                    assert_eq!(raw_text, text);
                    assert_eq!(cause, ParseFailure::Structural);
                }
                other => panic!("expected malformed for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn finish_keyword_is_case_sensitive() {
        match parse("Action: finish\nAction Input: 4") {
            Decision::Action { name, input, .. } => {
                assert_eq!(name, "finish");
                assert_eq!(input, json!(4));
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn code_in_input_is_literal_decode_failure() {
        let text = "Action: foo\nAction Input: __import__('os').system('x')";
        match parse(text) {
            Decision::Malformed { raw_text, cause } => {
                assert_eq!(raw_text, text);
                assert_eq!(cause.tag(), "literal_decode");
                assert!(matches!(
                    cause,
                    ParseFailure::LiteralDecode(DecodeError::NonLiteral { .. })
                ));
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn failure_tags_are_distinct() {
        assert_eq!(ParseFailure::Structural.tag(), "structural");
        assert_eq!(ParseFailure::LiteralDecode(DecodeError::Empty).tag(), "literal_decode");
    }

    #[test]
    fn empty_action_input_is_decode_failure() {
        match parse("Action: calc\nAction Input:") {
            Decision::Malformed { cause, .. } => {
                assert_eq!(cause, ParseFailure::LiteralDecode(DecodeError::Empty));
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn first_action_block_wins() {
        let decision = parse("Action: a\nAction Input: 1\nAction: b\nAction Input: 2");
        // The input of the first block spans to the end, which is not a literal.
        assert!(matches!(
            decision,
            Decision::Malformed {
                cause: ParseFailure::LiteralDecode(_),
                ..
            }
        ));
    }
}
