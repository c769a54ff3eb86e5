//! OpenAI-compatible HTTP client for chat completions and embeddings

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

use super::{
    ChatClient, EmbeddingClient, EmbeddingResponse, GenerationOptions, GenerationResponse,
    Message, Usage,
};
use crate::error::{LlmError, Result};

/// Rough output-token prices in cents per 1k tokens, used for budget
/// accounting. Input tokens are billed at a quarter of the output rate.
fn price_cents_per_1k(model: &str) -> f64 {
    if model.starts_with("text-embedding") {
        0.013
    } else if model.contains("mini") || model.contains("nano") {
        0.06
    } else {
        1.0
    }
}

fn estimate_cost_cents(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let rate = price_cents_per_1k(model);
    (f64::from(prompt_tokens) * rate * 0.25 + f64::from(completion_tokens) * rate) / 1000.0
}

/// OpenAI-style API client
pub struct OpenAiClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    model: String,
    data: Vec<EmbeddingDatum>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    /// Map a non-success HTTP status onto the provider failure taxonomy
    async fn status_error(response: reqwest::Response) -> LlmError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        match status.as_u16() {
            429 => LlmError::RateLimit(body),
            401 | 403 => LlmError::Auth(body),
            s if s >= 500 => LlmError::ConnectionFailed(format!("status {s}: {body}")),
            s => LlmError::GenerationFailed(format!("status {s}: {body}")),
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse> {
        debug!(
            model = %options.model,
            messages = messages.len(),
            "chat completion request"
        );

        let request = ChatRequest {
            model: &options.model,
            messages,
            max_completion_tokens: options.max_tokens,
            reasoning_effort: options.reasoning_effort.as_deref(),
        };

        let response = timeout(
            Duration::from_secs(options.timeout_secs),
            self.client
                .post(self.endpoint("chat/completions"))
                .bearer_auth(&self.api_key)
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let err = Self::status_error(response).await;
            error!("chat completion failed: {err}");
            return Err(err.into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let api_usage = parsed.usage.unwrap_or_default();
        let usage = Usage {
            prompt_tokens: api_usage.prompt_tokens,
            completion_tokens: api_usage.completion_tokens,
            total_tokens: api_usage.total_tokens,
            cost_cents: estimate_cost_cents(
                &parsed.model,
                api_usage.prompt_tokens,
                api_usage.completion_tokens,
            ),
        };

        Ok(GenerationResponse {
            text,
            model: parsed.model,
            usage,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<EmbeddingResponse> {
        debug!(model, inputs = inputs.len(), "embedding request");

        let request = EmbeddingRequest { model, input: inputs };

        let response = self
            .client
            .post(self.endpoint("embeddings"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let err = Self::status_error(response).await;
            error!("embedding call failed: {err}");
            return Err(err.into());
        }

        let mut parsed: EmbeddingApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != inputs.len() {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                inputs.len(),
                parsed.data.len()
            ))
            .into());
        }

        // The API is allowed to return data out of order; restore input order.
        parsed.data.sort_by_key(|d| d.index);
        let vectors = parsed.data.into_iter().map(|d| d.embedding).collect();

        let api_usage = parsed.usage.unwrap_or_default();
        let usage = Usage {
            prompt_tokens: api_usage.prompt_tokens,
            completion_tokens: 0,
            total_tokens: api_usage.total_tokens,
            cost_cents: estimate_cost_cents(&parsed.model, api_usage.prompt_tokens, 0),
        };

        Ok(EmbeddingResponse {
            vectors,
            model: parsed.model,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::user_message;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(model: &str) -> GenerationOptions {
        GenerationOptions {
            model: model.to_string(),
            max_tokens: 256,
            timeout_secs: 5,
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn test_generate_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-5",
                "choices": [{"message": {"role": "assistant", "content": "hi there"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "test-key").unwrap();
        let response = client
            .generate(&[user_message("hello")], &options("gpt-5"))
            .await
            .unwrap();
        assert_eq!(response.text, "hi there");
        assert_eq!(response.usage.total_tokens, 15);
        assert!(response.usage.cost_cents > 0.0);
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_rate_limit_kind() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "test-key").unwrap();
        let err = client
            .generate(&[user_message("hello")], &options("gpt-5"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "bad-key").unwrap();
        let err = client
            .embed("text-embedding-3-large", &["x".to_string()])
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_embed_restores_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "text-embedding-3-large",
                "data": [
                    {"index": 1, "embedding": [2.0]},
                    {"index": 0, "embedding": [1.0]}
                ],
                "usage": {"prompt_tokens": 4, "total_tokens": 4}
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "test-key").unwrap();
        let response = client
            .embed(
                "text-embedding-3-large",
                &["a".to_string(), "b".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(response.vectors, vec![vec![1.0], vec![2.0]]);
    }
}
