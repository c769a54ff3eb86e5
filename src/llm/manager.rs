//! Provider manager: routes generation across a primary model and an
//! ordered fallback list, with bounded per-model retries.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    ChatClient, EmbeddingClient, EmbeddingResponse, GenerationOptions, GenerationResponse,
    Message,
};
use crate::error::{ErrorDisposition, LlmError, NewswireError, Result};

/// Configuration for the provider manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Retry attempts per model before falling through
    pub max_retries: usize,
    /// Delay between retries in milliseconds, doubled per attempt
    pub retry_delay_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

/// Routes calls across `primary_model` then `fallback_models` on the same
/// transport. Fatal provider errors abort the chain immediately.
pub struct ProviderManager {
    client: Arc<dyn ChatClient>,
    embedder: Arc<dyn EmbeddingClient>,
    primary_model: String,
    fallback_models: Vec<String>,
    config: ManagerConfig,
}

impl ProviderManager {
    pub fn new(
        client: Arc<dyn ChatClient>,
        embedder: Arc<dyn EmbeddingClient>,
        primary_model: impl Into<String>,
        fallback_models: Vec<String>,
    ) -> Self {
        Self {
            client,
            embedder,
            primary_model: primary_model.into(),
            fallback_models,
            config: ManagerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    async fn try_model(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse> {
        let mut opts = options.clone();
        opts.model = model.to_string();
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            match self.client.generate(messages, &opts).await {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(model, attempt, "generation succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if e.disposition() == ErrorDisposition::Fatal {
                        return Err(e);
                    }
                    warn!(model, attempt = attempt + 1, error = %e, "generation attempt failed");
                    last_error = Some(e);
                    if attempt + 1 < self.config.max_retries {
                        let delay = self.config.retry_delay_ms << attempt;
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| NewswireError::Llm(LlmError::AllProvidersFailed)))
    }

    /// Generate with automatic fallback through the model list.
    ///
    /// Returns the first success; on full exhaustion, the structured
    /// all-providers-failed error.
    pub async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse> {
        match self.try_model(&self.primary_model, messages, options).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                if e.disposition() == ErrorDisposition::Fatal {
                    return Err(e);
                }
                warn!(model = %self.primary_model, error = %e, "primary model failed, falling back");
            }
        }

        for model in &self.fallback_models {
            match self.try_model(model, messages, options).await {
                Ok(response) => {
                    debug!(model, "fallback model answered");
                    return Ok(response);
                }
                Err(e) => {
                    if e.disposition() == ErrorDisposition::Fatal {
                        return Err(e);
                    }
                    warn!(model, error = %e, "fallback model failed");
                }
            }
        }

        Err(NewswireError::Llm(LlmError::AllProvidersFailed))
    }

    /// Embed with bounded retries (no model fallback: the embedding model
    /// is deployment-fixed alongside the vector dimension).
    pub async fn embed(&self, model: &str, inputs: &[String]) -> Result<EmbeddingResponse> {
        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            match self.embedder.embed(model, inputs).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if e.disposition() == ErrorDisposition::Fatal {
                        return Err(e);
                    }
                    warn!(model, attempt = attempt + 1, error = %e, "embed attempt failed");
                    last_error = Some(e);
                    if attempt + 1 < self.config.max_retries {
                        let delay = self.config.retry_delay_ms << attempt;
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| NewswireError::Llm(LlmError::AllProvidersFailed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{user_message, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Chat client that fails for every model except `good_model`
    struct FlakyClient {
        good_model: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for FlakyClient {
        async fn generate(
            &self,
            _messages: &[Message],
            options: &GenerationOptions,
        ) -> Result<GenerationResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if options.model == self.good_model {
                Ok(GenerationResponse {
                    text: format!("answer from {}", options.model),
                    model: options.model.clone(),
                    usage: Usage::default(),
                })
            } else {
                Err(NewswireError::Llm(LlmError::Timeout))
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for FlakyClient {
        async fn embed(&self, model: &str, inputs: &[String]) -> Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                vectors: inputs.iter().map(|_| vec![0.0; 4]).collect(),
                model: model.to_string(),
                usage: Usage::default(),
            })
        }
    }

    fn options() -> GenerationOptions {
        GenerationOptions {
            model: String::new(),
            max_tokens: 64,
            timeout_secs: 1,
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_working_model() {
        let client = Arc::new(FlakyClient {
            good_model: "gpt-5-mini".to_string(),
            calls: AtomicUsize::new(0),
        });
        let manager = ProviderManager::new(
            client.clone(),
            client.clone(),
            "gpt-5",
            vec!["gpt-5-mini".to_string()],
        )
        .with_config(ManagerConfig {
            max_retries: 1,
            retry_delay_ms: 1,
        });

        let response = manager
            .generate(&[user_message("q")], &options())
            .await
            .unwrap();
        assert_eq!(response.model, "gpt-5-mini");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_structured_error() {
        let client = Arc::new(FlakyClient {
            good_model: "nothing".to_string(),
            calls: AtomicUsize::new(0),
        });
        let manager = ProviderManager::new(
            client.clone(),
            client,
            "gpt-5",
            vec!["gpt-5-mini".to_string()],
        )
        .with_config(ManagerConfig {
            max_retries: 1,
            retry_delay_ms: 1,
        });

        let err = manager
            .generate(&[user_message("q")], &options())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NewswireError::Llm(LlmError::AllProvidersFailed)
        ));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_chain() {
        struct AuthFail;
        #[async_trait]
        impl ChatClient for AuthFail {
            async fn generate(
                &self,
                _messages: &[Message],
                _options: &GenerationOptions,
            ) -> Result<GenerationResponse> {
                Err(NewswireError::Llm(LlmError::Auth("bad key".to_string())))
            }
        }
        #[async_trait]
        impl EmbeddingClient for AuthFail {
            async fn embed(&self, _model: &str, _inputs: &[String]) -> Result<EmbeddingResponse> {
                Err(NewswireError::Llm(LlmError::Auth("bad key".to_string())))
            }
        }

        let client = Arc::new(AuthFail);
        let manager = ProviderManager::new(
            client.clone(),
            client,
            "gpt-5",
            vec!["gpt-5-mini".to_string()],
        );
        let err = manager
            .generate(&[user_message("q")], &options())
            .await
            .unwrap_err();
        assert!(matches!(err, NewswireError::Llm(LlmError::Auth(_))));
    }
}
