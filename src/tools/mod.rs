//! Tools the agent can invoke, and the registry that looks them up by name.

mod calculator;
mod datetime;
mod web;

pub use calculator::Calculator;
pub use datetime::CurrentDatetime;
pub use web::WebSearch;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A capability the model can call through `Action: <name>`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in the `Action:` line.
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// Run the tool on a decoded action input and return the observation.
    async fn execute(&self, input: Value) -> anyhow::Result<String>;
}

/// Name and description of a registered tool, as rendered into prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0}")]
    Invocation(String),
}

/// Ordered set of tools keyed by name.
///
/// Tools are described in registration order. Registering a name twice
/// replaces the earlier tool in place.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the calculator, datetime and web search tools.
    pub fn with_builtin_tools() -> Self {
        Self::new()
            .with_tool(Calculator)
            .with_tool(CurrentDatetime)
            .with_tool(WebSearch::new())
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => {
                tracing::debug!("Replacing tool: {}", name);
                self.tools[slot] = tool;
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| &self.tools[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names and descriptions for prompt rendering.
    pub fn describe(&self) -> Vec<ToolDescription> {
        self.tools
            .iter()
            .map(|t| ToolDescription {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Execute the named tool.
    pub async fn invoke(&self, name: &str, input: Value) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        tool.execute(input)
            .await
            .map_err(|e| ToolError::Invocation(format!("{:#}", e)))
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

type ToolFn = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync;

/// A tool backed by an async closure.
///
/// ```rust,ignore
/// let echo = FnTool::new("echo", "Repeat the input", |input| async move {
///     Ok(input.to_string())
/// });
/// ```
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    func: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Arc::new(move |input| func(input).boxed()),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, input: Value) -> anyhow::Result<String> {
        (self.func)(input).await
    }
}
