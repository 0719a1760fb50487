//! Mock LLM client for testing.
//!
//! Provides deterministic responses based on input patterns, plus an
//! optional script of responses returned in order before any pattern.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{AnalystError, Result};
use crate::llm::types::{CompletionOptions, Message, Role};
use crate::llm::LlmClient;

/// Marker the summary prompt always contains.
const SUMMARY_MARKER: &str = "Result Data";

/// Marker the fix prompt always contains.
const FIX_MARKER: &str = "Original SQL:";

/// Mock LLM client that returns canned responses based on input patterns.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    /// Custom response mappings (pattern -> response).
    custom_responses: Vec<(String, String)>,
    /// Responses returned first, one per call. `Err` entries fail the call.
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    /// Every prompt received, as the last user message.
    received: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a custom response mapping.
    ///
    /// When the input contains `pattern`, the mock will return `response`.
    pub fn with_response(
        mut self,
        pattern: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        self.custom_responses
            .push((pattern.into(), response.into()));
        self
    }

    /// Queues a response for the next unscripted call.
    pub fn then_respond(self, response: impl Into<String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(response.into()));
        }
        self
    }

    /// Queues a failure for the next unscripted call.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(message.into()));
        }
        self
    }

    /// Last user message of every call, in order.
    pub fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .map(|received| received.clone())
            .unwrap_or_default()
    }

    /// Generates a mock response based on the input.
    fn mock_response(&self, input: &str) -> String {
        let input_lower = input.to_lowercase();

        for (pattern, response) in &self.custom_responses {
            if input_lower.contains(&pattern.to_lowercase()) {
                return response.clone();
            }
        }

        if input.contains(SUMMARY_MARKER) {
            let question = input
                .lines()
                .find_map(|line| line.strip_prefix("User Question: "))
                .unwrap_or("your question");
            return format!("Here is a summary of the results for: {}", question.trim());
        }

        if input.contains(FIX_MARKER) {
            return "SELECT p.name AS product_name, SUM(s.revenue) AS total_revenue\n\
                    FROM product p\nJOIN sales s ON p.id = s.product_id\n\
                    GROUP BY p.id, p.name\nORDER BY total_revenue DESC"
                .to_string();
        }

        if input_lower.contains("territor") {
            return "```sql\nSELECT t.name AS territory, SUM(s.revenue) AS total_revenue\n\
                    FROM territory t\nJOIN sales s ON t.id = s.territory_id\n\
                    GROUP BY t.id, t.name\nORDER BY total_revenue DESC\n```"
                .to_string();
        }

        if input_lower.contains("hcp") || input_lower.contains("prescriber") {
            return "SELECT h.first_name, h.last_name, COUNT(s.id) AS sale_count\n\
                    FROM hcp h\nJOIN sales s ON h.id = s.hcp_id\n\
                    GROUP BY h.id, h.first_name, h.last_name\nORDER BY sale_count DESC"
                .to_string();
        }

        if input_lower.contains("product") || input_lower.contains("revenue") {
            return "```sql\nSELECT p.name AS product_name, SUM(s.revenue) AS total_revenue\n\
                    FROM product p\nJOIN sales s ON p.id = s.product_id\n\
                    GROUP BY p.id, p.name\nORDER BY total_revenue DESC\n```"
                .to_string();
        }

        "SELECT COUNT(id) AS sale_count FROM sales".to_string()
    }

    /// Extracts the last user message content from a message list.
    fn extract_user_input(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _options: CompletionOptions) -> Result<String> {
        let input = Self::extract_user_input(messages);
        if let Ok(mut received) = self.received.lock() {
            received.push(input.clone());
        }

        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());

        match scripted {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(AnalystError::llm(message)),
            None => Ok(self.mock_response(&input)),
        }
    }
}
