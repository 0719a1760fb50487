//! Execution layer.
//!
//! Runs validated queries against the sales database under a statement
//! timeout and a post-execution row cap. Only [`ValidatedQuery`] values
//! are accepted, so unchecked SQL cannot reach a connection.

mod mock;
mod postgres;
mod types;

pub use mock::MockDatabaseClient;
pub use postgres::PostgresClient;
pub use types::{ColumnInfo, QueryResult, Row, Value};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConnectionConfig, PolicyConfig};
use crate::error::Result;
use crate::safety::ValidatedQuery;

/// Creates a Postgres client for the given connection configuration.
pub async fn connect(config: &ConnectionConfig) -> Result<PostgresClient> {
    PostgresClient::connect(config).await
}

/// Resource bounds applied to a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Server-side statement timeout.
    pub timeout: Duration,
    /// Maximum rows handed back to the caller.
    pub row_cap: usize,
}

impl ExecutionLimits {
    pub fn new(timeout: Duration, row_cap: usize) -> Self {
        Self { timeout, row_cap }
    }

    /// Limits for one validated query: the row cap never exceeds the
    /// query's own LIMIT or the configured maximum.
    pub fn for_query(query: &ValidatedQuery, policy: &PolicyConfig) -> Self {
        let cap = query.limit().min(policy.max_limit);
        Self {
            timeout: Duration::from_secs(policy.statement_timeout_secs),
            row_cap: usize::try_from(cap).unwrap_or(usize::MAX),
        }
    }
}

/// Why a validated query failed to execute.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Query execution timed out. Try a more specific query.")]
    Timeout,

    #[error("Access denied for this query.")]
    PermissionDenied,

    #[error("Query execution failed: {0}")]
    Failed(String),
}

impl ExecutionError {
    /// Machine-readable category, matching the policy violation kinds.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "execution-timeout",
            Self::PermissionDenied => "execution-permission-denied",
            Self::Failed(_) => "execution-generic",
        }
    }
}

/// Interface to the database that answers validated queries.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Executes a validated query within the given limits.
    async fn execute(
        &self,
        query: &ValidatedQuery,
        limits: ExecutionLimits,
    ) -> std::result::Result<QueryResult, ExecutionError>;

    /// Closes the underlying connections.
    async fn close(&self);
}
