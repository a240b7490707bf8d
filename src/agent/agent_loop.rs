//! Core agent loop implementation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::parser::{ActionTextParser, Decision, ParseFailure, FINISH_ACTION};
use super::prompt::{PromptAssembler, ReactPromptTemplate};
use super::transcript::Transcript;
use super::truncate_for_log;
use crate::config::Config;
use crate::llm::CompletionClient;
use crate::tools::{ToolDescription, ToolError, ToolRegistry};

/// Faults that abort a run.
///
/// Parse failures, unknown tools, tool errors, timeouts and the iteration
/// budget are not faults; they are reported through [`RunResult`] or as
/// observations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("run cancelled")]
    Cancelled,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// The model answered with `Action: Finish`. The finishing turn is the
    /// last step of `transcript`.
    Completed {
        output: String,
        transcript: Transcript,
    },
    /// `max_iterations` steps ran without a finish.
    ExhaustedIterations { last_transcript: Transcript },
    /// A completion could not be parsed (after any configured retries).
    ParseFailure {
        raw_text: String,
        cause: ParseFailure,
        transcript: Transcript,
    },
}

impl RunResult {
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Completed { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        match self {
            Self::Completed { transcript, .. } | Self::ParseFailure { transcript, .. } => {
                transcript
            }
            Self::ExhaustedIterations { last_transcript } => last_transcript,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Retry and timeout policy for a loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopOptions {
    /// Extra completions allowed per step when the reply cannot be parsed.
    pub parse_retries: usize,
    /// Limit for a single tool invocation; exceeding it becomes an observation.
    pub tool_timeout: Option<Duration>,
    /// Limit for a single completion call; exceeding it uses up the step
    /// with a timeout observation.
    pub completion_timeout: Option<Duration>,
}

impl From<&Config> for LoopOptions {
    fn from(config: &Config) -> Self {
        Self {
            parse_retries: config.parse_retries,
            tool_timeout: Some(Duration::from_secs(config.tool_timeout_secs)),
            completion_timeout: Some(Duration::from_secs(config.completion_timeout_secs)),
        }
    }
}

/// Outcome of asking the model for the next step.
enum Turn {
    Decided(Decision),
    TimedOut(Duration),
}

/// The ReAct agent.
///
/// Holds only immutable collaborators, so one `Agent` can serve many
/// concurrent runs.
pub struct Agent {
    llm: Arc<dyn CompletionClient>,
    prompt: Arc<dyn PromptAssembler>,
    parser: ActionTextParser,
    options: LoopOptions,
}

impl Agent {
    /// Create an agent with the default ReAct prompt and no retries or timeouts.
    pub fn new(llm: Arc<dyn CompletionClient>) -> Self {
        Self {
            llm,
            prompt: Arc::new(ReactPromptTemplate::default()),
            parser: ActionTextParser::new(),
            options: LoopOptions::default(),
        }
    }

    pub fn from_config(config: &Config, llm: Arc<dyn CompletionClient>) -> Self {
        Self::new(llm).with_options(LoopOptions::from(config))
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn PromptAssembler>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &LoopOptions {
        &self.options
    }

    /// Run the loop for `query` until it finishes, fails to parse, or
    /// `max_iterations` steps have been taken.
    pub async fn run(
        &self,
        query: &str,
        tools: &ToolRegistry,
        max_iterations: usize,
    ) -> Result<RunResult, AgentError> {
        self.run_with_cancellation(query, tools, max_iterations, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), stopping with `AgentError::Cancelled` once
    /// `cancel` fires. The token is checked between steps, never mid-call.
    pub async fn run_with_cancellation(
        &self,
        query: &str,
        tools: &ToolRegistry,
        max_iterations: usize,
        cancel: &CancellationToken,
    ) -> Result<RunResult, AgentError> {
        if max_iterations == 0 {
            return Err(AgentError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let span = tracing::info_span!("react_run", run_id = %Uuid::new_v4());
        self.drive(query, tools, max_iterations, cancel)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        query: &str,
        tools: &ToolRegistry,
        max_iterations: usize,
        cancel: &CancellationToken,
    ) -> Result<RunResult, AgentError> {
        let descriptions = tools.describe();
        let mut transcript = Transcript::new();

        tracing::info!(
            max_iterations,
            tools = descriptions.len(),
            "Starting run: {}",
            truncate_for_log(query, 200)
        );

        for iteration in 1..=max_iterations {
            tracing::debug!("Agent iteration {}", iteration);

            let decision = match self.decide(query, &transcript, &descriptions, cancel).await? {
                Turn::Decided(decision) => decision,
                Turn::TimedOut(limit) => {
                    tracing::warn!("Completion timed out after {:?}", limit);
                    transcript.append(
                        String::new(),
                        String::new(),
                        Value::Null,
                        format!(
                            "timeout: completion did not respond within {}ms",
                            limit.as_millis()
                        ),
                    );
                    continue;
                }
            };

            match decision {
                Decision::Finish { output, thought } => {
                    transcript.append(
                        thought,
                        FINISH_ACTION.to_string(),
                        Value::String(output.clone()),
                        String::new(),
                    );
                    tracing::info!(steps = transcript.len(), "Run completed");
                    return Ok(RunResult::Completed { output, transcript });
                }
                Decision::Malformed { raw_text, cause } => {
                    tracing::warn!(cause = cause.tag(), steps = transcript.len(), "Run stopped on unparseable completion");
                    return Ok(RunResult::ParseFailure {
                        raw_text,
                        cause,
                        transcript,
                    });
                }
                Decision::Action {
                    name,
                    input,
                    thought,
                } => {
                    if cancel.is_cancelled() {
                        return Err(AgentError::Cancelled);
                    }
                    tracing::debug!("Calling tool: {} with input: {}", name, input);
                    let observation = self.observe(tools, &name, input.clone()).await;
                    tracing::debug!("Observation: {}", truncate_for_log(&observation, 1000));
                    transcript.append(thought, name, input, observation);
                }
            }
        }

        tracing::warn!(
            "Max iterations ({}) reached without completion",
            max_iterations
        );
        Ok(RunResult::ExhaustedIterations {
            last_transcript: transcript,
        })
    }

    /// Prompt, complete and parse, retrying unparseable replies if allowed.
    async fn decide(
        &self,
        query: &str,
        transcript: &Transcript,
        tools: &[ToolDescription],
        cancel: &CancellationToken,
    ) -> Result<Turn, AgentError> {
        let prompt = self.prompt.render(query, transcript, tools);
        let mut retries = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let raw = match self.complete(&prompt).await? {
                Some(raw) => raw,
                None => return Ok(Turn::TimedOut(self.completion_limit())),
            };
            let decision = self.parser.parse(&raw);

            if let Decision::Malformed { cause, .. } = &decision {
                if retries < self.options.parse_retries {
                    retries += 1;
                    tracing::warn!(
                        cause = cause.tag(),
                        attempt = retries,
                        "Retrying unparseable completion"
                    );
                    continue;
                }
            }
            return Ok(Turn::Decided(decision));
        }
    }

    /// `None` when the completion outlived `completion_timeout`.
    async fn complete(&self, prompt: &str) -> Result<Option<String>, AgentError> {
        let call = self.llm.complete(prompt);
        let result = match self.options.completion_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => return Ok(None),
            },
            None => call.await,
        };
        result
            .map(Some)
            .map_err(|e| AgentError::Completion(format!("{:#}", e)))
    }

    fn completion_limit(&self) -> Duration {
        self.options.completion_timeout.unwrap_or_default()
    }

    /// Invoke a tool and turn every outcome into an observation.
    async fn observe(&self, tools: &ToolRegistry, name: &str, input: Value) -> String {
        let invocation = tools.invoke(name, input);
        let outcome = match self.options.tool_timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!("Tool {} timed out after {:?}", name, limit);
                    return format!(
                        "timeout: tool '{}' did not respond within {}ms",
                        name,
                        limit.as_millis()
                    );
                }
            },
            None => invocation.await,
        };

        match outcome {
            Ok(observation) => observation,
            Err(e @ ToolError::UnknownTool(_)) => {
                tracing::warn!("Model asked for unregistered tool: {}", name);
                e.to_string()
            }
            Err(e @ ToolError::Invocation(_)) => {
                tracing::debug!("Tool {} failed: {}", name, e);
                e.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedCompletion;
    use crate::tools::FnTool;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn calc_tool() -> FnTool {
        FnTool::new("calc", "Add 'a' and 'b'", |input| async move {
            let a = input["a"].as_i64().ok_or_else(|| anyhow::anyhow!("missing a"))?;
            let b = input["b"].as_i64().ok_or_else(|| anyhow::anyhow!("missing b"))?;
            Ok((a + b).to_string())
        })
    }

    fn agent(llm: &Arc<ScriptedCompletion>) -> Agent {
        Agent::new(llm.clone())
    }

    #[tokio::test]
    async fn finishes_in_one_step_with_empty_registry() {
        let llm = Arc::new(ScriptedCompletion::repeating("Action: Finish\nAction Input: 4"));
        let result = agent(&llm).run("2+2", &ToolRegistry::new(), 5).await.unwrap();

        assert_eq!(result.output(), Some("4"));
        let transcript = result.transcript();
        assert_eq!(transcript.len(), 1);
        let step = &transcript.steps()[0];
        assert_eq!(step.action, "Finish");
        assert_eq!(step.input, json!("4"));
        assert_eq!(step.observation, "");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn action_then_finish() {
        let llm = Arc::new(ScriptedCompletion::new([
            "I should add.\nAction: calc\nAction Input: {'a':2,'b':2}",
            "Thought: I now know the final answer\nAction: Finish\nAction Input: 4",
        ]));
        let tools = ToolRegistry::new().with_tool(calc_tool());

        let result = agent(&llm).run("2+2", &tools, 5).await.unwrap();
        assert_eq!(result.output(), Some("4"));

        let transcript = result.transcript();
        assert_eq!(transcript.len(), 2);
        let step = &transcript.steps()[0];
        assert_eq!(step.index, 1);
        assert_eq!(step.thought, "I should add.");
        assert_eq!(step.action, "calc");
        assert_eq!(step.input, json!({"a": 2, "b": 2}));
        assert_eq!(step.observation, "4");
        let finish = &transcript.steps()[1];
        assert_eq!(finish.index, 2);
        assert_eq!(finish.thought, "I now know the final answer");
        assert_eq!(finish.action, "Finish");

        // The second prompt carries the first step's observation.
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Observation: 4\nThought:"));
        assert!(prompts[0].contains("- calc: Add 'a' and 'b'"));
    }

    #[tokio::test]
    async fn exhausts_iterations_after_exactly_n_steps() {
        let llm = Arc::new(ScriptedCompletion::repeating(
            "Action: calc\nAction Input: {'a': 1, 'b': 1}",
        ));
        let tools = ToolRegistry::new().with_tool(calc_tool());

        let result = agent(&llm).run("loop", &tools, 3).await.unwrap();
        match result {
            RunResult::ExhaustedIterations { last_transcript } => {
                assert_eq!(last_transcript.len(), 3);
                let indices: Vec<_> = last_transcript.iter().map(|s| s.index).collect();
                assert_eq!(indices, vec![1, 2, 3]);
            }
            other => panic!("expected exhausted iterations, got {other:?}"),
        }
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_observation() {
        let llm = Arc::new(ScriptedCompletion::new([
            "Action: teleport\nAction Input: 'mars'",
            "Action: Finish\nAction Input: cannot teleport",
        ]));

        let result = agent(&llm).run("go", &ToolRegistry::new(), 5).await.unwrap();
        assert_eq!(result.output(), Some("cannot teleport"));
        let step = &result.transcript().steps()[0];
        assert_eq!(step.action, "teleport");
        assert_eq!(step.observation, "unknown tool: teleport");
    }

    #[tokio::test]
    async fn tool_failure_becomes_observation() {
        let llm = Arc::new(ScriptedCompletion::new([
            "Action: calc\nAction Input: {'a': 1}",
            "Action: Finish\nAction Input: gave up",
        ]));
        let tools = ToolRegistry::new().with_tool(calc_tool());

        let result = agent(&llm).run("q", &tools, 5).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.transcript().steps()[0].observation, "missing b");
    }

    #[tokio::test]
    async fn structural_failure_stops_run() {
        let llm = Arc::new(ScriptedCompletion::new(["The answer is 4."]));
        let result = agent(&llm).run("q", &ToolRegistry::new(), 5).await.unwrap();
        assert_eq!(
            result,
            RunResult::ParseFailure {
                raw_text: "The answer is 4.".to_string(),
                cause: ParseFailure::Structural,
                transcript: Transcript::new(),
            }
        );
    }

    #[tokio::test]
    async fn literal_decode_failure_is_reported_distinctly() {
        let text = "Action: foo\nAction Input: __import__('os').system('x')";
        let llm = Arc::new(ScriptedCompletion::new([text]));
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let tools = ToolRegistry::new().with_tool(FnTool::new("foo", "counts calls", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok("ran".to_string()) }
        }));

        match agent(&llm).run("q", &tools, 5).await.unwrap() {
            RunResult::ParseFailure { raw_text, cause, .. } => {
                assert_eq!(raw_text, text);
                assert_eq!(cause.tag(), "literal_decode");
            }
            other => panic!("expected parse failure, got {other:?}"),
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn parse_retries_are_bounded() {
        let llm = Arc::new(ScriptedCompletion::new([
            "garbage",
            "more garbage",
            "Action: Finish\nAction Input: ok",
        ]));
        let options = LoopOptions {
            parse_retries: 2,
            ..LoopOptions::default()
        };
        let result = Agent::new(llm.clone())
            .with_options(options)
            .run("q", &ToolRegistry::new(), 1)
            .await
            .unwrap();
        assert_eq!(result.output(), Some("ok"));
        assert_eq!(llm.calls(), 3);

        let llm = Arc::new(ScriptedCompletion::repeating("garbage"));
        let options = LoopOptions {
            parse_retries: 1,
            ..LoopOptions::default()
        };
        let result = Agent::new(llm.clone())
            .with_options(options)
            .run("q", &ToolRegistry::new(), 1)
            .await
            .unwrap();
        assert!(matches!(result, RunResult::ParseFailure { .. }));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn tool_timeout_becomes_observation() {
        let llm = Arc::new(ScriptedCompletion::new([
            "Action: slow\nAction Input: None",
            "Action: Finish\nAction Input: done",
        ]));
        let tools = ToolRegistry::new().with_tool(FnTool::new("slow", "sleeps", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }));
        let options = LoopOptions {
            tool_timeout: Some(Duration::from_millis(20)),
            ..LoopOptions::default()
        };

        let result = Agent::new(llm.clone())
            .with_options(options)
            .run("q", &tools, 3)
            .await
            .unwrap();
        assert_eq!(result.output(), Some("done"));
        assert_eq!(
            result.transcript().steps()[0].observation,
            "timeout: tool 'slow' did not respond within 20ms"
        );
    }

    #[tokio::test]
    async fn stalled_completions_exhaust_iterations() {
        let llm = Arc::new(
            ScriptedCompletion::repeating("Action: Finish\nAction Input: 4")
                .with_delay(Duration::from_secs(60)),
        );
        let options = LoopOptions {
            completion_timeout: Some(Duration::from_millis(20)),
            ..LoopOptions::default()
        };
        let result = Agent::new(llm.clone())
            .with_options(options)
            .run("q", &ToolRegistry::new(), 3)
            .await
            .unwrap();
        match result {
            RunResult::ExhaustedIterations { last_transcript } => {
                assert_eq!(last_transcript.len(), 3);
                for step in &last_transcript {
                    assert_eq!(step.action, "");
                    assert_eq!(step.input, Value::Null);
                    assert_eq!(
                        step.observation,
                        "timeout: completion did not respond within 20ms"
                    );
                }
            }
            other => panic!("expected exhausted iterations, got {other:?}"),
        }
        assert_eq!(llm.calls(), 3);
    }

    struct SlowFirstReply {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CompletionClient for SlowFirstReply {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok("Action: Finish\nAction Input: 4".to_string())
        }
    }

    #[tokio::test]
    async fn completion_timeout_uses_up_one_step() {
        let llm = Arc::new(SlowFirstReply {
            calls: AtomicUsize::new(0),
        });
        let options = LoopOptions {
            completion_timeout: Some(Duration::from_millis(20)),
            ..LoopOptions::default()
        };
        let result = Agent::new(llm)
            .with_options(options)
            .run("q", &ToolRegistry::new(), 3)
            .await
            .unwrap();

        assert_eq!(result.output(), Some("4"));
        let steps = result.transcript().steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].observation, "timeout: completion did not respond within 20ms");
        assert_eq!(steps[1].action, "Finish");
    }

    #[tokio::test]
    async fn completion_failure_is_an_error() {
        let llm = Arc::new(ScriptedCompletion::new(Vec::<String>::new()));
        let err = agent(&llm).run("q", &ToolRegistry::new(), 3).await.unwrap_err();
        assert!(matches!(err, AgentError::Completion(ref msg) if msg.contains("exhausted")));
    }

    #[tokio::test]
    async fn cancelled_before_first_step() {
        let llm = Arc::new(ScriptedCompletion::repeating("Action: Finish\nAction Input: 4"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent(&llm)
            .run_with_cancellation("q", &ToolRegistry::new(), 3, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_between_steps() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let llm = Arc::new(ScriptedCompletion::repeating("Action: stop\nAction Input: None"));
        let tools = ToolRegistry::new().with_tool(FnTool::new("stop", "cancels the run", move |_| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                Ok("cancel requested".to_string())
            }
        }));

        let err = agent(&llm)
            .run_with_cancellation("q", &tools, 5, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        // The in-flight step finished; no further completion was requested.
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn zero_iterations_is_rejected() {
        let llm = Arc::new(ScriptedCompletion::repeating("Action: Finish\nAction Input: 4"));
        let err = agent(&llm).run("q", &ToolRegistry::new(), 0).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn concurrent_runs_are_independent() {
        let llm = Arc::new(ScriptedCompletion::repeating(
            "Action: calc\nAction Input: {'a': 1, 'b': 2}",
        ));
        let agent = agent(&llm);
        let tools = ToolRegistry::new().with_tool(calc_tool());

        let runs = (0..4).map(|i| agent.run("q", &tools, i + 1));
        let results = futures::future::join_all(runs).await;

        for (i, result) in results.into_iter().enumerate() {
            let result = result.unwrap();
            assert!(matches!(result, RunResult::ExhaustedIterations { .. }));
            assert_eq!(result.transcript().len(), i + 1);
        }
        assert_eq!(llm.calls(), 1 + 2 + 3 + 4);
    }
}
