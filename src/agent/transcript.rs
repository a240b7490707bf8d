//! Append-only record of completed loop steps.

use serde::Serialize;
use serde_json::Value;

/// One completed think/act/observe step.
///
/// A run that finishes records its `Finish` turn as the last step, with the
/// answer as `input` and an empty observation. A step whose completion timed
/// out has an empty `action` and a `Null` input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    /// 1-based position in the transcript.
    pub index: usize,
    pub thought: String,
    pub action: String,
    pub input: Value,
    pub observation: String,
}

/// Steps of a single run, in execution order.
///
/// Only the loop driver appends; everyone else gets read access.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcript {
    steps: Vec<Step>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(
        &mut self,
        thought: String,
        action: String,
        input: Value,
        observation: String,
    ) -> &Step {
        let index = self.steps.len() + 1;
        self.steps.push(Step {
            index,
            thought,
            action,
            input,
            observation,
        });
        &self.steps[index - 1]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Render the steps in the same grammar the model writes, so the prompt
    /// can continue right after a trailing `Thought:`.
    ///
    /// Inputs are written as JSON, which the literal decoder also accepts.
    pub fn render_scratchpad(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            if !step.thought.is_empty() {
                out.push(' ');
                out.push_str(&step.thought);
            }
            if !step.action.is_empty() {
                out.push_str(&format!(
                    "\nAction: {}\nAction Input: {}",
                    step.action, step.input
                ));
            }
            out.push_str(&format!("\nObservation: {}\nThought:", step.observation));
        }
        out
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
