//! Completion client that replays canned replies.
//!
//! Useful for offline runs and deterministic tests of the loop: each call to
//! `complete` returns the next scripted reply and records the prompt it got.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::CompletionClient;

#[derive(Debug)]
pub struct ScriptedCompletion {
    replies: Vec<String>,
    next: AtomicUsize,
    repeat_last: bool,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    /// Replay `replies` in order, then fail.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
            repeat_last: false,
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Return `reply` on every call.
    pub fn repeating(reply: impl Into<String>) -> Self {
        let reply: String = reply.into();
        Self {
            repeat_last: true,
            ..Self::new([reply])
        }
    }

    /// Sleep before each reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());

        let call = self.next.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.replies.get(call) {
            Some(reply) => Ok(reply.clone()),
            None if self.repeat_last => self
                .replies
                .last()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("scripted completion has no replies")),
            None => anyhow::bail!(
                "scripted completion exhausted after {} replies",
                self.replies.len()
            ),
        }
    }
}
