//! HTTP client for an OpenAI-compatible provider
//!
//! Serves three callers: the search agent (chat), the vision analyzer
//! (multimodal chat) and the embedder. Rate-limited calls are retried
//! with capped exponential backoff.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::domain::graph::{ChatPort, Embedder};
use crate::error::{Error, Result};

use super::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, LlmResponse, Message,
};

/// How rate-limited requests are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryPolicy {
    attempts: u32,
    base: Duration,
    cap: Duration,
}

const RETRY: RetryPolicy = RetryPolicy {
    attempts: 3,
    base: Duration::from_secs(1),
    cap: Duration::from_secs(60),
};

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based), honouring the provider's hint
    fn delay(&self, retry: u32, hint_secs: u64) -> Duration {
        let doubled = self.base.saturating_mul(1 << retry.saturating_sub(1).min(16));
        let delay = doubled.max(Duration::from_secs(hint_secs)).min(self.cap);
        delay + jitter(delay / 10)
    }
}

/// Up to `spread`, taken from the clock so concurrent callers drift apart
fn jitter(spread: Duration) -> Duration {
    let spread_ms = spread.as_millis() as u64;
    if spread_ms == 0 {
        return Duration::ZERO;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    Duration::from_millis(nanos % spread_ms)
}

/// Chat, vision and embedding calls against one provider
///
/// Clones share the connection pool.
#[derive(Clone)]
pub struct LlmClient {
    http: HttpClient,
    llm: LlmConfig,
    embedding: EmbeddingConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // api_key stays out of logs
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.llm.chat_model)
            .field("embedding_model", &self.embedding.model)
            .finish()
    }
}

#[derive(Default)]
pub struct LlmClientBuilder {
    llm: LlmConfig,
    embedding: EmbeddingConfig,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(self, llm: LlmConfig) -> Self {
        Self { llm, ..self }
    }

    pub fn embedding(self, embedding: EmbeddingConfig) -> Self {
        Self { embedding, ..self }
    }

    pub fn api_key(self, key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..self
        }
    }

    /// Takes precedence over `llm.base_url`
    pub fn base_url(self, url: impl Into<String>) -> Self {
        Self {
            base_url: Some(url.into()),
            ..self
        }
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        Self {
            timeout: Some(Duration::from_secs(secs)),
            ..self
        }
    }

    pub fn build(self) -> Result<LlmClient> {
        let Some(api_key) = self.api_key else {
            return Err(Error::LLMError("API key is required".to_string()));
        };

        let timeout = self
            .timeout
            .unwrap_or(Duration::from_secs(self.llm.timeout_secs));
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = self
            .base_url
            .as_deref()
            .unwrap_or(&self.llm.base_url)
            .trim_end_matches('/')
            .to_string();

        Ok(LlmClient {
            http,
            llm: self.llm,
            embedding: self.embedding,
            api_key,
            base_url,
        })
    }
}

impl LlmClient {
    pub fn new(llm: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::builder().config(llm).api_key(api_key).build()
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn chat_model(&self) -> &str {
        &self.llm.chat_model
    }

    pub fn vision_model(&self) -> &str {
        &self.llm.vision_model
    }

    /// One completion; `model` overrides the configured chat model
    pub async fn chat(&self, messages: Vec<Message>, model: Option<&str>) -> Result<LlmResponse> {
        let request = ChatRequest::new(model.unwrap_or(&self.llm.chat_model), messages)
            .with_temperature(self.llm.temperature)
            .with_max_tokens(self.llm.max_tokens);

        let response: ChatResponse = self.send("chat/completions", &request).await?;
        LlmResponse::from_chat_response(response)
            .ok_or_else(|| Error::LLMError("Provider returned no completion".to_string()))
    }

    /// Embed `text`, checking the vector against the configured dimension
    pub async fn embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest::new(&self.embedding.model, text);
        let response: EmbeddingResponse = self
            .send("embeddings", &request)
            .await
            .map_err(|e| match e {
                Error::LLMError(msg) => Error::EmbeddingFailed(msg),
                other => other,
            })?;

        let vector = response
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .ok_or_else(|| Error::EmbeddingFailed("Provider returned no vectors".to_string()))?;

        if vector.len() != self.embedding.dimension {
            return Err(Error::EmbeddingFailed(format!(
                "Expected {} dimensions from {}, got {}",
                self.embedding.dimension,
                self.embedding.model,
                vector.len()
            )));
        }
        Ok(vector)
    }

    async fn send<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut retry = 0;
        loop {
            match self.send_once(path, body).await {
                Err(Error::RateLimited(hint)) if retry + 1 < RETRY.attempts => {
                    retry += 1;
                    let wait = RETRY.delay(retry, hint);
                    warn!(path, retry, wait_ms = wait.as_millis() as u64, "Provider rate limit hit");
                    tokio::time::sleep(wait).await;
                }
                result => return result,
            }
        }
    }

    async fn send_once<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "Provider request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_error_status(status, &text));
        }

        response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Unreadable provider response: {}", e)))
    }
}

#[async_trait]
impl ChatPort for LlmClient {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        Ok(self.chat(messages, None).await?.content)
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedding(text).await
    }

    fn dimension(&self) -> usize {
        self.embedding.dimension
    }
}

fn map_error_status(status: StatusCode, body: &str) -> Error {
    let message = match status.as_u16() {
        429 => return Error::RateLimited(retry_after(body).unwrap_or(60)),
        401 => "Unauthorized: set INKCRE_API_KEY or OPENAI_API_KEY to a valid key".to_string(),
        402 => "Payment required: provider credits exhausted".to_string(),
        400 => format!("Bad request: {}", body),
        403 => format!("Forbidden: {}", body),
        404 => format!("Unknown model or endpoint: {}", body),
        500..=599 => format!("Provider error ({}): {}", status, body),
        _ => format!("HTTP {}: {}", status, body),
    };
    Error::LLMError(message)
}

/// `retry_after` seconds, at the top level or under `error`
fn retry_after(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.pointer("/error/retry_after"))
        .and_then(serde_json::Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            chat_model: "test/chat".to_string(),
            vision_model: "test/vision".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::builder()
            .config(test_config())
            .api_key("test-key")
            .base_url("https://example.com/v1/")
            .timeout_secs(60)
            .build()
            .unwrap();

        assert_eq!(client.chat_model(), "test/chat");
        assert_eq!(client.vision_model(), "test/vision");
        assert_eq!(client.base_url, "https://example.com/v1");
    }

    #[test]
    fn test_client_builder_requires_api_key() {
        let result = LlmClient::builder().config(test_config()).build();
        assert!(matches!(result, Err(Error::LLMError(_))));
    }

    #[test]
    fn test_base_url_from_config() {
        let client = LlmClient::new(test_config(), "k").unwrap();
        assert_eq!(client.base_url, "https://api.ppinfra.com/v3/openai");
        assert_eq!(Embedder::dimension(&client), 1024);
    }

    #[test]
    fn test_client_debug_hides_key() {
        let client = LlmClient::new(test_config(), "secret-key").unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("test/chat"));
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmClient>();
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert!(RETRY.delay(1, 0) >= Duration::from_secs(1));
        assert!(RETRY.delay(2, 0) >= Duration::from_secs(2));
        assert!(RETRY.delay(1, 5) >= Duration::from_secs(5));
        assert!(RETRY.delay(30, 0) <= Duration::from_secs(66));
        assert!(RETRY.delay(1, 600) <= Duration::from_secs(66));
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        assert!(jitter(Duration::from_millis(100)) < Duration::from_millis(100));
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(retry_after(r#"{"retry_after": 30}"#), Some(30));
        assert_eq!(retry_after(r#"{"error": {"retry_after": 60}}"#), Some(60));
        assert_eq!(retry_after(r#"{"message": "rate limited"}"#), None);
        assert_eq!(retry_after("not json"), None);
    }

    #[test]
    fn test_map_error_status() {
        let err = map_error_status(StatusCode::TOO_MANY_REQUESTS, r#"{"retry_after": 7}"#);
        assert!(matches!(err, Error::RateLimited(7)));

        let err = map_error_status(StatusCode::UNAUTHORIZED, "");
        assert!(err.to_string().contains("INKCRE_API_KEY"));

        let err = map_error_status(StatusCode::BAD_GATEWAY, "upstream");
        assert!(err.to_string().contains("upstream"));
    }
}
