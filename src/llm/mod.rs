//! LLM provider contract: chat generation and embeddings.
//!
//! The pipeline only ever talks to the traits here; the OpenAI-style HTTP
//! client and the fallback router live in submodules.

mod manager;
mod openai;

pub use manager::{ManagerConfig, ProviderManager};
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Helper to create a system message
pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

/// Helper to create a user message
pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}

/// Token usage and estimated cost of one provider call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Estimated cost in cents, from the per-model price table
    pub cost_cents: f64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.cost_cents += other.cost_cents;
    }
}

/// Per-call generation options
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Provider reasoning effort knob; passed through verbatim
    pub reasoning_effort: Option<String>,
}

/// Response from text generation
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
    pub usage: Usage,
}

/// Response from an embedding call
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub usage: Usage,
}

/// Trait for chat-completion providers
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse>;
}

/// Trait for embedding providers
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of inputs; the response preserves input order
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<EmbeddingResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_lowercase_serialization() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_usage_accumulation() {
        let mut total = Usage::default();
        total.add(&Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
            cost_cents: 0.2,
        });
        total.add(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost_cents: 0.1,
        });
        assert_eq!(total.total_tokens, 165);
        assert!((total.cost_cents - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_message_helpers() {
        let msg = system_message("You answer briefly.");
        assert_eq!(msg.role, Role::System);
        let msg = user_message("hello");
        assert_eq!(msg.role, Role::User);
    }
}
