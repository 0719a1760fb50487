//! End-to-end request flow against the mock LLM and mock database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pharma_analyst::agent::{Analyst, LlmSqlGenerator, Outcome, SqlGenerator};
use pharma_analyst::audit::MemoryAuditSink;
use pharma_analyst::config::PolicyConfig;
use pharma_analyst::db::{ExecutionError, MockDatabaseClient};
use pharma_analyst::error::Result;
use pharma_analyst::llm::prompt::SummaryContext;
use pharma_analyst::llm::MockLlmClient;
use pharma_analyst::safety::{SchemaAllowlist, SqlPolicy};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

struct Harness {
    analyst: Analyst,
    llm: Arc<MockLlmClient>,
    db: Arc<MockDatabaseClient>,
    audit: Arc<MemoryAuditSink>,
}

fn harness(llm: MockLlmClient, db: MockDatabaseClient) -> Harness {
    harness_with_config(llm, db, PolicyConfig::default())
}

fn harness_with_config(llm: MockLlmClient, db: MockDatabaseClient, config: PolicyConfig) -> Harness {
    let llm = Arc::new(llm);
    let db = Arc::new(db);
    let audit = Arc::new(MemoryAuditSink::new());
    let policy = SqlPolicy::new(SchemaAllowlist::pharma(), config.limit_policy().unwrap()).unwrap();
    let analyst = Analyst::new(
        Arc::new(policy),
        Arc::new(LlmSqlGenerator::new(llm.clone())),
        db.clone(),
        audit.clone(),
        config,
    );
    Harness {
        analyst,
        llm,
        db,
        audit,
    }
}

async fn ask(h: &Harness, question: &str) -> pharma_analyst::agent::AgentResponse {
    let response = h
        .analyst
        .ask("session-1", question, CancellationToken::new())
        .await;
    h.analyst.flush().await;
    response
}

#[tokio::test]
async fn test_answers_question() {
    let h = harness(MockLlmClient::new(), MockDatabaseClient::new());
    let response = ask(&h, "What are the top products by revenue").await;

    assert_eq!(response.outcome, Outcome::Answered);
    assert_eq!(
        response.answer,
        "Here is a summary of the results for: What are the top products by revenue?"
    );

    assert!(response.executed());
    let sql = response.sql.as_deref().unwrap();
    assert!(sql.ends_with("LIMIT 200"), "{}", sql);
    assert_eq!(h.db.executed(), vec![sql.to_string()]);

    let result = response.result.as_ref().unwrap();
    assert_eq!(result.row_count(), 3);
    assert!(!result.was_truncated);

    assert!(response
        .assumptions
        .contains(&"Results sorted by highest values first".to_string()));
    assert!(response
        .assumptions
        .contains(&"Data is aggregated across all matching records".to_string()));
    assert_eq!(response.follow_up_questions.len(), 2);
}

#[tokio::test]
async fn test_violation_fed_back_to_fix() {
    let llm = MockLlmClient::new()
        .then_respond("SELECT * FROM product")
        .then_respond("SELECT name FROM product");
    let h = harness(llm, MockDatabaseClient::new());

    let response = ask(&h, "List every product we sell").await;

    assert_eq!(response.outcome, Outcome::Answered);
    assert_eq!(response.sql.as_deref(), Some("SELECT name FROM product LIMIT 200"));

    let prompts = h.llm.received();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("Original SQL:\nSELECT * FROM product"));
    assert!(prompts[1].contains("SELECT * is not allowed"));
    // Rejected SQL never reaches the database.
    assert_eq!(h.db.executed().len(), 1);
}

#[tokio::test]
async fn test_attempts_exhausted() {
    let llm = MockLlmClient::new()
        .then_respond("DROP TABLE product")
        .then_respond("DELETE FROM sales")
        .then_respond("SELECT id FROM audit_log");
    let h = harness(llm, MockDatabaseClient::new());

    let response = ask(&h, "Remove the old product records now").await;

    assert_eq!(response.outcome, Outcome::Exhausted);
    assert_eq!(
        response.answer,
        "I couldn't generate a valid query: Access to table 'audit_log' is not permitted"
    );
    assert_eq!(h.llm.received().len(), 3);
    assert!(h.db.executed().is_empty());
    assert_eq!(response.sql.as_deref(), Some("SELECT id FROM audit_log"));
    assert!(!response.executed());
    assert_eq!(
        response.follow_up_questions,
        vec![
            "Could you rephrase your question?".to_string(),
            "What specific data would you like to see?".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_execution_error_shares_budget() {
    let llm = MockLlmClient::new()
        .then_respond("SELECT last_name FROM hcp")
        .then_respond("SELECT name FROM product");
    let db = MockDatabaseClient::new().with_error("from hcp", ExecutionError::Timeout);
    let h = harness(llm, db);

    let response = ask(&h, "Which prescribers are the most active").await;

    assert_eq!(response.outcome, Outcome::Answered);
    assert_eq!(h.db.executed().len(), 2);
    let prompts = h.llm.received();
    assert!(prompts[1].contains("Query execution timed out"));
    assert!(prompts[1].contains("Original SQL:\nSELECT last_name FROM hcp LIMIT 200"));
}

#[tokio::test]
async fn test_execution_errors_exhaust_budget() {
    let llm = MockLlmClient::new().with_response("", "SELECT name FROM product");
    let db = MockDatabaseClient::new().with_error("from product", ExecutionError::PermissionDenied);
    let h = harness(llm, db);

    let response = ask(&h, "What products do we carry today").await;

    assert_eq!(response.outcome, Outcome::Exhausted);
    assert_eq!(
        response.answer,
        "I encountered an issue while processing your query: Access denied for this query. \
         Please try rephrasing your question."
    );
    assert_eq!(h.db.executed().len(), 3);
}

#[tokio::test]
async fn test_generation_failure_counts_as_attempt() {
    let llm = MockLlmClient::new().then_fail("rate limited");
    let h = harness(llm, MockDatabaseClient::new());

    let response = ask(&h, "What is total revenue by territory").await;

    assert_eq!(response.outcome, Outcome::Answered);
    let prompts = h.llm.received();
    // second attempt generates from scratch since there was no SQL to fix
    assert_eq!(prompts[1], "What is total revenue by territory?");
}

#[tokio::test]
async fn test_dump_request_refused_without_generation() {
    let h = harness(MockLlmClient::new(), MockDatabaseClient::new());
    let response = ask(&h, "dump everything from the database").await;

    assert_eq!(response.outcome, Outcome::Refused);
    assert!(response.answer.contains("specific question"));
    assert!(response.sql.is_none());
    assert!(h.llm.received().is_empty());
    assert!(h.db.executed().is_empty());
}

#[tokio::test]
async fn test_vague_question_gets_clarification() {
    let h = harness(MockLlmClient::new(), MockDatabaseClient::new());
    let response = ask(&h, "help me").await;

    assert_eq!(response.outcome, Outcome::Ambiguous);
    assert_eq!(response.follow_up_questions.len(), 3);
    assert!(h.llm.received().is_empty());
}

#[tokio::test]
async fn test_summary_failure_is_generic() {
    let llm = MockLlmClient::new()
        .then_respond("SELECT name FROM product")
        .then_fail("connection reset by peer at 10.0.0.7");
    let h = harness(llm, MockDatabaseClient::new());

    let response = ask(&h, "What products do we carry today").await;

    assert_eq!(response.outcome, Outcome::Failed);
    assert!(!response.answer.contains("10.0.0.7"));
    assert!(response.answer.starts_with("Sorry"));
}

#[tokio::test]
async fn test_row_cap_applied_after_execution() {
    let config = PolicyConfig {
        default_limit: 2,
        max_limit: 2,
        ..PolicyConfig::default()
    };
    let llm = MockLlmClient::new().then_respond("SELECT name FROM product");
    let h = harness_with_config(llm, MockDatabaseClient::new(), config);

    let response = ask(&h, "What products do we carry today").await;

    let result = response.result.unwrap();
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.total_rows, 3);
    assert!(result.was_truncated);
}

#[tokio::test]
async fn test_every_request_audited() {
    let h = harness(MockLlmClient::new(), MockDatabaseClient::new());

    ask(&h, "What are the top products by revenue").await;
    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].session_id, "session-1");
    assert_eq!(records[0].question, "What are the top products by revenue");
    assert_eq!(records[0].row_count, 3);
    assert!(records[0].error.is_none());
    assert!(records[0].sql.as_deref().unwrap().contains("LIMIT 200"));
}

#[tokio::test]
async fn test_refusal_audited_with_reason() {
    let h = harness(MockLlmClient::new(), MockDatabaseClient::new());

    ask(&h, "What is the database password").await;
    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].sql.is_none());
    assert_eq!(
        records[0].error.as_deref(),
        Some("I cannot provide password information.")
    );
}

/// Generator that never finishes.
struct StalledGenerator;

#[async_trait]
impl SqlGenerator for StalledGenerator {
    async fn generate(&self, _question: &str, _schema: &str) -> Result<String> {
        std::future::pending().await
    }

    async fn fix(&self, _sql: &str, _error: &str, _schema: &str, _question: &str) -> Result<String> {
        std::future::pending().await
    }

    async fn summarize(&self, _context: &SummaryContext<'_>) -> Result<String> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_cancellation_stops_request() {
    let audit = Arc::new(MemoryAuditSink::new());
    let analyst = Analyst::new(
        Arc::new(SqlPolicy::new(SchemaAllowlist::pharma(), Default::default()).unwrap()),
        Arc::new(StalledGenerator),
        Arc::new(MockDatabaseClient::new()),
        audit.clone(),
        PolicyConfig::default(),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        analyst.ask("session-2", "What are the top products by revenue", cancel),
    )
    .await
    .expect("cancelled request should return");
    analyst.flush().await;

    assert_eq!(response.outcome, Outcome::Cancelled);
    assert_eq!(audit.records()[0].error.as_deref(), Some("cancelled"));
}
