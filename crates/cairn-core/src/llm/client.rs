//! OpenRouter LLM client
//!
//! Chat completions and embeddings over HTTP, retrying rate-limited
//! requests with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};

use super::provider::{Embedder, Generation, GenerationOptions, TextGenerator};
use super::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, EmbeddingVector, LlmResponse,
    Message,
};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Maximum number of attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

const DEFAULT_EMBEDDING_MODEL: &str = "openai/text-embedding-3-small";

/// OpenRouter client
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
    base_url: String,
    embedding_model: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("default_model", &self.config.default_model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

/// Builder for [`LlmClient`]
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    embedding_model: Option<String>,
    timeout_secs: Option<u64>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding(mut self, embedding: &EmbeddingConfig) -> Self {
        self.embedding_model = Some(embedding.model.clone());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (defaults to OpenRouter)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        let config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .ok_or_else(|| Error::LLMError("API key is required".to_string()))?;

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(LlmClient {
            http_client,
            config,
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            embedding_model: self
                .embedding_model
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        })
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new().config(config).api_key(api_key).build()
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    /// Build a client from the loaded configuration and the API key env vars
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let api_key = config
            .llm
            .resolved_api_key()
            .map_err(|e| Error::ConfigError(e.to_string()))?
            .ok_or_else(|| {
                Error::LLMError(
                    "No API key set. Export CAIRN_API_KEY or OPENROUTER_API_KEY.".to_string(),
                )
            })?;

        LlmClientBuilder::new()
            .config(config.llm.clone())
            .embedding(&config.embedding)
            .api_key(api_key)
            .build()
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Make a chat completion request
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        model: Option<&str>,
        options: &GenerationOptions,
    ) -> Result<LlmResponse> {
        let model = model.unwrap_or(&self.config.default_model);

        let request = ChatRequest::new(model, messages)
            .with_temperature(options.temperature.unwrap_or(self.config.temperature))
            .with_max_tokens(options.max_tokens.unwrap_or(self.config.max_tokens));

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response: ChatResponse = self.post_with_retry("chat/completions", &request).await?;

        LlmResponse::from_chat_response(response)
            .ok_or_else(|| Error::LLMError("Empty response from API".to_string()))
    }

    /// Generate an embedding for a single text
    pub async fn embed_text(&self, text: &str) -> Result<EmbeddingVector> {
        let request = EmbeddingRequest::new(&self.embedding_model, text);

        debug!(model = %request.model, chars = text.len(), "Sending embedding request");

        let response: EmbeddingResponse = self
            .post_with_retry("embeddings", &request)
            .await
            .map_err(|e| match e {
                Error::Serialization(inner) => {
                    Error::EmbeddingFailed(format!("Failed to parse response: {}", inner))
                }
                other => other,
            })?;

        let tokens_used = response.usage.map(|u| u.prompt_tokens).unwrap_or(0);
        let data = response
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .ok_or_else(|| Error::EmbeddingFailed("Empty embedding response".to_string()))?;

        Ok(EmbeddingVector {
            vector: data.embedding,
            model: response.model,
            tokens_used,
        })
    }

    async fn post_with_retry<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.post(path, body).await {
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        endpoint = path,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                other => return other,
            }
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Cairn")
            .json(body)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body));
        }

        let text = response.text().await.map_err(Error::NetworkError)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &options.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        let response = self.complete(messages, None, options).await?;
        Ok(Generation {
            text: response.content,
            model: response.model,
            tokens_used: response.tokens_used,
        })
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.embed_text(text).await
    }
}

fn error_for_status(status: reqwest::StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 => Error::LLMError(
            "Unauthorized: Invalid API key. Set CAIRN_API_KEY or OPENROUTER_API_KEY environment variable."
                .to_string(),
        ),
        429 => Error::RateLimited(extract_retry_after(body).unwrap_or(60)),
        400 => Error::LLMError(format!("Bad request: {}", body)),
        402 => Error::LLMError(
            "Payment required: Insufficient credits on OpenRouter account".to_string(),
        ),
        404 => Error::LLMError(format!("Model not found or endpoint unavailable: {}", body)),
        500..=599 => Error::LLMError(format!("Server error ({}): {}", status, body)),
        _ => Error::LLMError(format!("HTTP error {}: {}", status, body)),
    }
}

/// Backoff delay in milliseconds with up to 10% jitter
fn calculate_backoff(attempt: u32, suggested_wait: u64) -> u64 {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1));
    let delay = base.max(suggested_wait * 1000);

    let jitter = (delay / 10).max(1);
    delay + rand::thread_rng().gen_range(0..jitter)
}

fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error").and_then(|e| e.get("retry_after")))
        .and_then(|v| v.as_u64())
}
