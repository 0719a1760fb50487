//! LLM client factory.
//!
//! Centralizes provider-specific logic for creating LLM clients.

use crate::config::LlmConfig;
use crate::error::{AnalystError, Result};
use crate::llm::{LlmClient, LlmProvider, MockLlmClient, OpenAiClient, OpenAiConfig};

/// Creates an LLM client for the given provider.
///
/// The OpenAI key is taken from `api_key` when given, otherwise from
/// `OPENAI_API_KEY`. `OPENAI_MODEL` overrides the configured model.
pub fn create_client(
    provider: LlmProvider,
    config: &LlmConfig,
    api_key: Option<String>,
) -> Result<Box<dyn LlmClient>> {
    match provider {
        LlmProvider::OpenAi => {
            let key = api_key
                .filter(|key| !key.trim().is_empty())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| {
                    AnalystError::llm(
                        "No API key configured. Set OPENAI_API_KEY or use --llm mock.",
                    )
                })?;
            let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| config.model.clone());
            let client_config = OpenAiConfig::new(key, model).with_timeout(config.timeout_secs);
            Ok(Box::new(OpenAiClient::new(client_config)?))
        }
        LlmProvider::Mock => Ok(Box::new(MockLlmClient::new())),
    }
}
