//! Request auditing.
//!
//! Every question produces exactly one [`AuditRecord`]. Recording is
//! fire-and-forget: failures are logged and never reach the caller.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::PgPool;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::error::{AnalystError, Result};

/// One audited request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub session_id: String,
    pub question: String,
    /// Last SQL that ran or was attempted, if any was generated.
    pub sql: Option<String>,
    pub runtime_ms: i64,
    pub row_count: i64,
    pub error: Option<String>,
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Records in the background on `tasks`. The returned handle may be
/// ignored; wait on the tracker to flush pending records before exit.
pub fn spawn_record(
    tasks: &TaskTracker,
    sink: Arc<dyn AuditSink>,
    record: AuditRecord,
) -> JoinHandle<()> {
    tasks.spawn(async move {
        if let Err(e) = sink.record(&record).await {
            warn!(session_id = %record.session_id, "Failed to write audit record: {}", e);
        }
    })
}

/// Writes records to the `audit_log` table.
#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log
            (session_id, question, sql_text, runtime_ms, row_count, error_text)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.question)
        .bind(record.sql.as_deref())
        .bind(record.runtime_ms)
        .bind(record.row_count)
        .bind(record.error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| AnalystError::query(format!("Failed to insert audit record: {e}")))?;

        Ok(())
    }
}

/// Emits records as structured log events only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        info!(
            target: "pharma_analyst::audit",
            session_id = %record.session_id,
            runtime_ms = record.runtime_ms,
            row_count = record.row_count,
            has_sql = record.sql.is_some(),
            error = record.error.as_deref().unwrap_or(""),
            "request audited"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| AnalystError::internal("audit buffer poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
