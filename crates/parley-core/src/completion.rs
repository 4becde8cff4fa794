//! Chat-completion collaborator.
//!
//! Backends (OpenAI-compatible HTTP, disabled) live in the `parley` app
//! crate. The engine sends a role-tagged transcript and receives the
//! assistant's text.

use anyhow::Result;
use async_trait::async_trait;

pub use crate::models::{ChatMessage, Role};

/// Chat-completion service.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Complete a transcript. The last message is the one to answer.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}
