//! PostgreSQL execution client.
//!
//! Each query runs in its own read-only transaction with a transaction-local
//! statement timeout. The transaction is always rolled back, so the timeout
//! setting never outlives the query on a pooled connection.

use crate::config::ConnectionConfig;
use crate::db::{ColumnInfo, DatabaseClient, ExecutionError, ExecutionLimits, QueryResult, Row, Value};
use crate::error::{AnalystError, Result};
use crate::safety::ValidatedQuery;
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, Statement, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Extra time the client waits past the server-side timeout before giving up.
const CLIENT_GRACE: Duration = Duration::from_secs(2);

const SQLSTATE_QUERY_CANCELED: &str = "57014";
const SQLSTATE_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// PostgreSQL database client.
#[derive(Debug, Clone)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Creates a client from an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, shared with the audit sink.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connects to the database, retrying transient failures with
    /// exponential back-off.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Connected to {}", config.display_string());
                    return Ok(Self { pool });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(error) => map_connection_error(error, config),
            None => AnalystError::connection("No connection attempt was made"),
        })
    }

    async fn run(
        &self,
        sql: &str,
        limits: ExecutionLimits,
    ) -> std::result::Result<QueryResult, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let conn: &mut PgConnection = &mut tx;

        // SET does not accept bind parameters; the value is a formatted integer.
        // Plain string queries go over the simple protocol, which allows both
        // statements in one round trip and returns text-format values that
        // keep NUMERIC exact.
        let setup = format!(
            "SET TRANSACTION READ ONLY; SET LOCAL statement_timeout = {}",
            limits.timeout.as_millis()
        );
        (&mut *conn).execute(setup.as_str()).await?;

        let start = Instant::now();
        let result: Vec<PgRow> = (&mut *conn).fetch_all(sql).await?;
        let execution_time = start.elapsed();

        let columns: Vec<ColumnInfo> = match result.first() {
            Some(first_row) => first_row
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            None => match conn.prepare(sql).await {
                Ok(statement) => statement
                    .columns()
                    .iter()
                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                    .collect(),
                Err(e) => {
                    debug!("Could not describe empty result: {}", e);
                    Vec::new()
                }
            },
        };

        tx.rollback().await?;

        let rows: Vec<Row> = result.iter().map(convert_row).collect();
        let result = QueryResult::capped(columns, rows, limits.row_cap)
            .with_execution_time(execution_time);

        if result.was_truncated {
            warn!(
                "Query returned {} rows, truncating to {} rows",
                result.total_rows, limits.row_cap
            );
        }

        Ok(result)
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    async fn execute(
        &self,
        query: &ValidatedQuery,
        limits: ExecutionLimits,
    ) -> std::result::Result<QueryResult, ExecutionError> {
        debug!(timeout = ?limits.timeout, row_cap = limits.row_cap, "Executing: {}", query);

        let result = tokio::time::timeout(
            limits.timeout + CLIENT_GRACE,
            self.run(query.as_str(), limits),
        )
        .await
        .map_err(|_| {
            warn!("Query exceeded client-side deadline");
            ExecutionError::Timeout
        })?;

        result.map_err(map_execution_error)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "NUMERIC" => text_value(row, index)
            .map(Value::Decimal)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // Dates, timestamps and the rest arrive as text.
        _ => text_value(row, index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn text_value(row: &PgRow, index: usize) -> Option<String> {
    row.try_get_unchecked::<Option<String>, _>(index)
        .ok()
        .flatten()
}

/// Maps a failed execution to the user-facing category.
fn map_execution_error(error: sqlx::Error) -> ExecutionError {
    let code = error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .map(|code| code.into_owned());

    match code.as_deref() {
        Some(SQLSTATE_QUERY_CANCELED) => ExecutionError::Timeout,
        Some(SQLSTATE_INSUFFICIENT_PRIVILEGE) => ExecutionError::PermissionDenied,
        _ => ExecutionError::Failed(format_query_error(&error)),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    if matches!(error, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) {
        return true;
    }

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
        || error_str.contains("ssl")
        || error_str.contains("tls")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> AnalystError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        AnalystError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        AnalystError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        AnalystError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        AnalystError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        AnalystError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        AnalystError::connection(error.to_string())
    }
}

/// Formats a query error with the server's detail and hint, if any. The
/// text is fed back to the generator on retry.
fn format_query_error(error: &sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}
