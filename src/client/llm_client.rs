//! LLM client for OpenAI-compatible chat completion endpoints.
//!
//! Epistemic foundation:
//! - K_i: OpenAI API schema is the de facto standard
//! - K_i: `n` returns several independent choices from one request
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will be valid JSON (might fail)
//! - I^B: Network availability unknowable → retry with backoff

use crate::client::Backend;
use crate::models::{BackendConfig, BackendError, Message, Result, SamplerError};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    n: usize,
    temperature: f64,
    max_tokens: u32,
}

/// Chat completion response.
///
/// Choices are accepted in three shapes: OpenAI chat (`message.content`),
/// legacy completions (`text`) and flattened proxies (`content`).
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
    text: Option<String>,
    content: Option<String>,
}

impl ChatChoice {
    fn into_text(self) -> String {
        self.message
            .and_then(|m| m.content)
            .or(self.text)
            .or(self.content)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Flatten a response body into choice texts.
fn normalize_choices(body: ChatCompletionResponse) -> Vec<String> {
    body.choices.into_iter().map(ChatChoice::into_text).collect()
}

/// Client for any OpenAI-compatible endpoint (OpenAI, OpenRouter, vLLM,
/// Ollama, or a thin proxy in front of one of them).
///
/// Features:
/// - Batched sampling via `n`
/// - Retry with exponential backoff, `retry-after` aware on 429
/// - Token usage tracking
pub struct LlmClient {
    client: reqwest::Client,
    /// Model identifier sent with every request
    model: String,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    /// Base URL for the API
    base_url: String,
    /// Request timeout
    timeout: Duration,
    /// Extra attempts after the first
    retry_limit: u32,
    /// Completion length cap per choice
    max_tokens: u32,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl LlmClient {
    /// Create a new client from backend configuration and a resolved key.
    pub fn new(config: &BackendConfig, api_key: Option<String>) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SamplerError::Network)?;

        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            retry_limit: config.retry_limit,
            max_tokens: config.max_tokens,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(ref api_key) = self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("powersample"));

        headers
    }

    /// Classify a non-success response.
    fn classify_failure(&self, status: u16, body: &str, retry_after: Option<f64>) -> BackendError {
        let message = serde_json::from_str::<ApiErrorResponse>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());

        match status {
            401 => BackendError::AuthenticationFailed,
            404 => BackendError::ModelNotFound(self.model.clone()),
            429 => BackendError::RateLimited {
                message,
                retry_after_secs: retry_after,
            },
            _ => BackendError::ApiError { status, message },
        }
    }

    /// Send one request, without retries.
    async fn attempt(&self, url: &str, request: &ChatCompletionRequest<'_>) -> Result<Vec<String>> {
        let response = self
            .client
            .post(url)
            .headers(self.headers())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SamplerError::Timeout(self.timeout)
                } else {
                    SamplerError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(self
                .classify_failure(status.as_u16(), &body, retry_after)
                .into());
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| SamplerError::ParseError(format!("Failed to parse response: {e}")))?;

        if let Some(usage) = &body.usage {
            self.total_input_tokens
                .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
            self.total_output_tokens
                .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
        }

        Ok(normalize_choices(body))
    }

    /// Get total tokens tracked as (input, output).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl Backend for LlmClient {
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    /// I^B(rate limits) → backoff
    async fn complete(
        &self,
        messages: &[Message],
        n: usize,
        temperature: f64,
    ) -> Result<Vec<String>> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            n,
            temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let attempts = self.retry_limit + 1;
        let mut last_error: Option<SamplerError> = None;

        for attempt in 0..attempts {
            match self.attempt(&url, &request).await {
                Ok(texts) => {
                    debug!(
                        model = %self.model,
                        n,
                        temperature,
                        returned = texts.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Completion received"
                    );
                    return Ok(texts);
                }
                Err(e) => {
                    // Don't retry auth errors, unknown models or bad requests
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if attempt + 1 < attempts {
                        let backoff = e
                            .retry_after()
                            .map(Duration::from_secs_f64)
                            .unwrap_or_else(|| Duration::from_secs(2u64.pow(attempt)));
                        debug!(
                            model = %self.model,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying after backend error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        Err(BackendError::MaxRetriesExceeded {
            attempts,
            last_error: last,
        }
        .into())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
