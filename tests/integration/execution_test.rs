//! Execution against a real PostgreSQL database.
//!
//! Requires DATABASE_URL pointing at a database with the sales schema
//! loaded. Tests skip when it is unset.

use std::sync::Arc;

use pharma_analyst::agent::{Analyst, LlmSqlGenerator, Outcome};
use pharma_analyst::audit::{AuditRecord, AuditSink, PostgresAuditSink};
use pharma_analyst::config::{ConnectionConfig, PolicyConfig};
use pharma_analyst::db::{DatabaseClient, ExecutionLimits, PostgresClient};
use pharma_analyst::llm::MockLlmClient;
use pharma_analyst::safety::{SchemaAllowlist, SqlPolicy};
use tokio_util::sync::CancellationToken;

/// Helper to create a test client.
async fn get_test_client() -> Option<PostgresClient> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    PostgresClient::connect(&config).await.ok()
}

fn policy() -> SqlPolicy {
    SqlPolicy::new(SchemaAllowlist::pharma(), Default::default()).unwrap()
}

#[tokio::test]
async fn test_validated_query_runs() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let query = policy()
        .validate_sql("SELECT t.name, SUM(s.revenue) AS total FROM territory t JOIN sales s ON s.territory_id = t.id GROUP BY t.name ORDER BY total DESC")
        .unwrap();
    let limits = ExecutionLimits::for_query(&query, &PolicyConfig::default());
    let result = client.execute(&query, limits).await.unwrap();

    assert_eq!(result.column_names(), vec!["name", "total"]);
    assert!(result.row_count() <= 200);

    client.close().await;
}

#[tokio::test]
async fn test_end_to_end_with_mock_llm() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let audit = Arc::new(PostgresAuditSink::new(client.pool().clone()));
    let db = Arc::new(client);
    let analyst = Analyst::new(
        Arc::new(policy()),
        Arc::new(LlmSqlGenerator::new(Arc::new(MockLlmClient::new()))),
        db.clone(),
        audit,
        PolicyConfig::default(),
    );

    let response = analyst
        .ask(
            "integration-test",
            "What are the top products by revenue",
            CancellationToken::new(),
        )
        .await;
    analyst.flush().await;

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(response.sql.unwrap().ends_with("LIMIT 200"));

    db.close().await;
}

#[tokio::test]
async fn test_audit_record_written() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let session_id = format!("audit-test-{}", uuid::Uuid::new_v4());
    let sink = PostgresAuditSink::new(client.pool().clone());
    sink.record(&AuditRecord {
        session_id: session_id.clone(),
        question: "How many sales were there?".to_string(),
        sql: Some("SELECT COUNT(id) AS n FROM sales LIMIT 200".to_string()),
        runtime_ms: 5,
        row_count: 1,
        error: None,
    })
    .await
    .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE session_id = $1")
        .bind(&session_id)
        .fetch_one(client.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);

    client.close().await;
}
