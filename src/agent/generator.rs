//! SQL generation collaborator.
//!
//! The request flow only sees [`SqlGenerator`]; the LLM-backed
//! implementation builds prompts, calls the client and extracts SQL.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::llm::prompt::{self, SummaryContext};
use crate::llm::{extract_sql, CompletionOptions, LlmClient};

/// Produces candidate SQL and result summaries.
///
/// Generated SQL is untrusted: callers must pass it through the guardrail.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Generates candidate SQL for a question.
    async fn generate(&self, question: &str, schema: &str) -> Result<String>;

    /// Repairs SQL that was rejected or failed, given the error text.
    async fn fix(&self, sql: &str, error: &str, schema: &str, question: &str) -> Result<String>;

    /// Summarizes executed results in business language.
    async fn summarize(&self, context: &SummaryContext<'_>) -> Result<String>;
}

/// [`SqlGenerator`] backed by any [`LlmClient`].
#[derive(Clone)]
pub struct LlmSqlGenerator {
    llm: Arc<dyn LlmClient>,
}

impl LlmSqlGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SqlGenerator for LlmSqlGenerator {
    async fn generate(&self, question: &str, schema: &str) -> Result<String> {
        let messages = prompt::generation_messages(schema, question);
        let response = self.llm.complete(&messages, CompletionOptions::SQL).await?;
        let sql = extract_sql(&response);
        debug!("Generated SQL: {}", sql);
        Ok(sql)
    }

    async fn fix(&self, sql: &str, error: &str, schema: &str, question: &str) -> Result<String> {
        let messages = prompt::fix_messages(schema, question, sql, error);
        let response = self.llm.complete(&messages, CompletionOptions::SQL).await?;
        let fixed = extract_sql(&response);
        debug!("Repaired SQL: {}", fixed);
        Ok(fixed)
    }

    async fn summarize(&self, context: &SummaryContext<'_>) -> Result<String> {
        let messages = prompt::summary_messages(context);
        let response = self
            .llm
            .complete(&messages, CompletionOptions::SUMMARY)
            .await?;
        Ok(response.trim().to_string())
    }
}
