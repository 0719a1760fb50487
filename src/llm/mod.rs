//! LLM integration.
//!
//! A provider-neutral completion trait, an OpenAI client, a deterministic
//! mock, and the prompt and response handling used for SQL generation.

pub mod factory;
pub mod mock;
pub mod openai;
pub mod parser;
pub mod prompt;
pub mod types;

pub use factory::create_client;
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use parser::extract_sql;
pub use types::{CompletionOptions, Message, Role};

use async_trait::async_trait;
use std::str::FromStr;

use crate::error::{AnalystError, Result};

/// A chat-completion backend. Returns the assistant's text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message], options: CompletionOptions) -> Result<String>;
}

/// Which backend `create_client` builds, selected by `--llm` or `[llm] provider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    OpenAi,
    /// Canned responses, no API key required.
    Mock,
}

impl LlmProvider {
    const ALL: [LlmProvider; 2] = [LlmProvider::OpenAi, LlmProvider::Mock];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = AnalystError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                AnalystError::config(format!(
                    "Unknown LLM provider '{}'. Expected 'openai' or 'mock'.",
                    name
                ))
            })
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
