//! OpenAI chat-completions client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AnalystError, Result};
use crate::llm::types::{CompletionOptions, Message};
use crate::llm::LlmClient;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// OpenAI API base URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Attempts per completion, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// OpenAI client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    /// Model to use (e.g., "gpt-4o-mini").
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Endpoint, overridable for proxies and tests.
    pub base_url: String,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// OpenAI LLM client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalystError::llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Converts internal messages to OpenAI API format.
    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Sends one request and classifies the outcome.
    async fn send_once(&self, request: &OpenAiRequest) -> Attempt {
        let response = match self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Attempt::Retry(AnalystError::llm("Request timed out. Try again."))
            }
            Err(e) if e.is_connect() => {
                return Attempt::Retry(AnalystError::llm(
                    "Failed to connect to OpenAI API. Check your network.",
                ))
            }
            Err(e) => return Attempt::Fail(AnalystError::llm(format!("Request failed: {}", e))),
        };

        let status = response.status();
        match response.text().await {
            Ok(body) if status.is_success() => match parse_success(&body) {
                Ok(content) => Attempt::Done(content),
                Err(e) => Attempt::Fail(e),
            },
            Ok(body) => classify_error(status, &body),
            Err(e) => Attempt::Fail(AnalystError::llm(format!("Failed to read response: {}", e))),
        }
    }
}

/// Outcome of a single API call.
#[derive(Debug)]
enum Attempt {
    Done(String),
    /// Transient failure: rate limits, 5xx, timeouts, refused connections.
    Retry(AnalystError),
    Fail(AnalystError),
}

fn classify_error(status: StatusCode, body: &str) -> Attempt {
    match status {
        StatusCode::UNAUTHORIZED => Attempt::Fail(AnalystError::llm(
            "Authentication failed. Check your OPENAI_API_KEY.",
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            Attempt::Retry(AnalystError::llm("Rate limited. Please wait and try again."))
        }
        _ => {
            let error = match serde_json::from_str::<OpenAiErrorResponse>(body) {
                Ok(parsed) => AnalystError::llm(format!("OpenAI API error: {}", parsed.error.message)),
                Err(_) => AnalystError::llm(format!("OpenAI API error ({}): {}", status, body)),
            };
            if status.is_server_error() {
                Attempt::Retry(error)
            } else {
                Attempt::Fail(error)
            }
        }
    }
}

fn parse_success(body: &str) -> Result<String> {
    let response: OpenAiResponse = serde_json::from_str(body)
        .map_err(|e| AnalystError::llm(format!("Failed to parse response: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or_else(|| AnalystError::llm("No response from OpenAI"))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message], options: CompletionOptions) -> Result<String> {
        let request = OpenAiRequest {
            model: self.config.model.clone(),
            messages: Self::convert_messages(messages),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;
        loop {
            debug!(attempt, model = %self.config.model, "Sending completion request");

            match self.send_once(&request).await {
                Attempt::Done(content) => return Ok(content),
                Attempt::Fail(error) => return Err(error),
                Attempt::Retry(error) if attempt >= MAX_ATTEMPTS => return Err(error),
                Attempt::Retry(error) => {
                    warn!(
                        "Completion request failed (attempt {}), retrying in {:?}: {}",
                        attempt, delay, error
                    );
                }
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
}
