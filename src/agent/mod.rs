//! Agent module - the ReAct action loop.
//!
//! The agent follows a "think, act, observe" pattern:
//! 1. Render a prompt from the question, the steps so far and the tools
//! 2. Ask the model for its next move as plain text
//! 3. Parse `Action:` / `Action Input:` out of the reply
//! 4. Run the tool and record the observation, or stop on `Action: Finish`
//! 5. Repeat until finished, unparseable, or out of iterations

mod agent_loop;
mod literal;
mod parser;
mod prompt;
mod transcript;

pub use agent_loop::{Agent, AgentError, LoopOptions, RunResult};
pub use literal::{DecodeError, LiteralDecoder};
pub use parser::{ActionTextParser, Decision, ParseFailure, FINISH_ACTION};
pub use prompt::{
    format_tool_descriptions, PromptAssembler, ReactPromptTemplate, DEFAULT_REACT_TEMPLATE,
};
pub use transcript::{Step, Transcript};

/// Truncate a string for logging purposes.
pub(crate) fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
