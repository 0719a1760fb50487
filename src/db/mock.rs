//! Mock database client for testing and offline demos.
//!
//! Returns canned results chosen by substring patterns over the validated
//! SQL, and records every statement it is asked to run.

use super::{ColumnInfo, DatabaseClient, ExecutionError, ExecutionLimits, QueryResult, Value};
use crate::safety::ValidatedQuery;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

type Response = std::result::Result<QueryResult, ExecutionError>;

/// A database client that returns predefined results.
#[derive(Debug, Default)]
pub struct MockDatabaseClient {
    /// Custom response mappings (pattern -> response), checked in order.
    responses: Vec<(String, Response)>,
    executed: Mutex<Vec<String>>,
}

impl MockDatabaseClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `result` when the SQL contains `pattern` (case-insensitive).
    pub fn with_result(mut self, pattern: impl Into<String>, result: QueryResult) -> Self {
        self.responses.push((pattern.into(), Ok(result)));
        self
    }

    /// Fails with `error` when the SQL contains `pattern` (case-insensitive).
    pub fn with_error(mut self, pattern: impl Into<String>, error: ExecutionError) -> Self {
        self.responses.push((pattern.into(), Err(error)));
        self
    }

    /// SQL text of every executed query, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }

    fn respond(&self, sql: &str) -> Response {
        let sql_lower = sql.to_lowercase();

        for (pattern, response) in &self.responses {
            if sql_lower.contains(&pattern.to_lowercase()) {
                return response.clone();
            }
        }

        Ok(default_result(&sql_lower))
    }
}

/// Canned data shaped like the sales dataset.
fn default_result(sql_lower: &str) -> QueryResult {
    if sql_lower.contains("territory") {
        return QueryResult::capped(
            vec![
                ColumnInfo::new("territory", "TEXT"),
                ColumnInfo::new("total_revenue", "NUMERIC"),
            ],
            vec![
                vec![Value::from("Northeast"), Value::Decimal("482150.00".into())],
                vec![Value::from("West"), Value::Decimal("391220.50".into())],
                vec![Value::from("South"), Value::Decimal("274980.25".into())],
            ],
            usize::MAX,
        );
    }

    if sql_lower.contains("product") {
        return QueryResult::capped(
            vec![
                ColumnInfo::new("name", "TEXT"),
                ColumnInfo::new("total_revenue", "NUMERIC"),
            ],
            vec![
                vec![Value::from("Cardiozen"), Value::Decimal("310400.00".into())],
                vec![Value::from("Neurolax"), Value::Decimal("255120.75".into())],
                vec![Value::from("Gastrofix"), Value::Decimal("198730.10".into())],
            ],
            usize::MAX,
        );
    }

    QueryResult::capped(
        vec![ColumnInfo::new("result", "INT8")],
        vec![vec![Value::Int(1)]],
        usize::MAX,
    )
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn execute(&self, query: &ValidatedQuery, limits: ExecutionLimits) -> Response {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(query.to_string());
        }

        let result = self.respond(query.as_str())?;
        Ok(QueryResult::capped(result.columns, result.rows, limits.row_cap)
            .with_execution_time(Duration::from_millis(1)))
    }

    async fn close(&self) {}
}
