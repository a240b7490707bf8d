//! # react_loop
//!
//! A text-based ReAct action loop for LLM agents.
//!
//! This library provides:
//! - A parser turning free-text completions into actions or a final answer
//! - A literal-only decoder for action inputs (nothing is ever evaluated)
//! - A think/act/observe loop driver with iteration, retry and timeout limits
//! - A tool registry plus a few built-in tools
//! - An OpenAI-compatible chat-completion client
//!
//! ## Architecture
//!
//! The agent follows the ReAct pattern:
//! 1. Render a prompt with the question, the tools and the steps so far
//! 2. Ask the model for `Action: <tool>` / `Action Input: <literal>`
//! 3. Run the tool and append the observation to the transcript
//! 4. Repeat until the model answers with `Action: Finish`
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use react_loop::{agent::Agent, llm::OpenAiCompatibleClient, tools::ToolRegistry, Config};
//!
//! let config = Config::from_env()?;
//! let llm = Arc::new(OpenAiCompatibleClient::from_config(&config)?);
//! let agent = Agent::from_config(&config, llm);
//! let result = agent
//!     .run("What is 17 * 3?", &ToolRegistry::with_builtin_tools(), config.max_iterations)
//!     .await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod tools;

pub use agent::{Agent, AgentError, Decision, RunResult};
pub use config::Config;
