//! Chat-completion collaborators.
//!
//! The loop only needs `prompt -> text`. Clients are built once at startup
//! and shared as `Arc<dyn CompletionClient>`; nothing here is global.

mod openai;
mod scripted;

pub use openai::{ChatMessage, OpenAiCompatibleClient, Role};
pub use scripted::ScriptedCompletion;

use async_trait::async_trait;

/// Turns a rendered prompt into the model's raw text reply.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}
