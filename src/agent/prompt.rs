//! Prompt templates for the ReAct loop.

use super::transcript::Transcript;
use super::AgentError;
use crate::tools::ToolDescription;

/// Renders the next prompt from the query, the steps so far and the tools.
///
/// Implementations must be deterministic: the same arguments always give
/// the same prompt.
pub trait PromptAssembler: Send + Sync {
    fn render(&self, query: &str, transcript: &Transcript, tools: &[ToolDescription]) -> String;
}

/// Default ReAct template.
///
/// Placeholders: `{tools}`, `{tool_names}`, `{input}`, `{agent_scratchpad}`.
/// The format section is the fixed contract with the parser and must keep
/// the `Action:` / `Action Input:` / `Action: Finish` lines.
pub const DEFAULT_REACT_TEMPLATE: &str = r#"Answer the following questions as best you can. You have access to the following tools:

{tools}

Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action, written as a Python literal (a quoted string, number, list or dict)
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Action: Finish
Action Input: the final answer to the original input question

Begin!

Question: {input}
Thought:{agent_scratchpad}"#;

const REQUIRED_PLACEHOLDERS: [&str; 2] = ["{input}", "{agent_scratchpad}"];

/// Placeholder-substituting template.
#[derive(Debug, Clone)]
pub struct ReactPromptTemplate {
    template: String,
}

impl Default for ReactPromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_REACT_TEMPLATE.to_string(),
        }
    }
}

impl ReactPromptTemplate {
    /// Use a custom template.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::InvalidConfig` if `{input}` or
    /// `{agent_scratchpad}` is missing.
    pub fn new(template: impl Into<String>) -> Result<Self, AgentError> {
        let template = template.into();
        let missing: Vec<_> = REQUIRED_PLACEHOLDERS
            .iter()
            .filter(|p| !template.contains(*p))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::InvalidConfig(format!(
                "prompt template must contain {}",
                missing.join(", ")
            )));
        }
        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl PromptAssembler for ReactPromptTemplate {
    fn render(&self, query: &str, transcript: &Transcript, tools: &[ToolDescription]) -> String {
        let tool_list = format_tool_descriptions(tools);
        let tool_names = tools
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let scratchpad = transcript.render_scratchpad();

        substitute(&self.template, |key| match key {
            "tools" => Some(tool_list.as_str()),
            "tool_names" => Some(tool_names.as_str()),
            "input" => Some(query),
            "agent_scratchpad" => Some(scratchpad.as_str()),
            _ => None,
        })
    }
}

/// One `- name: description` line per tool.
pub fn format_tool_descriptions(tools: &[ToolDescription]) -> String {
    if tools.is_empty() {
        return "(no tools available)".to_string();
    }
    tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single pass over `template`: substituted text is never re-scanned, so
/// a query containing `{agent_scratchpad}` stays literal.
fn substitute<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after
            .find('}')
            .and_then(|close| lookup(&after[..close]).map(|value| (close, value)));
        match replacement {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
