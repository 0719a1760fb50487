//! Error types for the analyst.
//!
//! Defines the crate-wide error enum. Guardrail rejections and execution
//! failures keep their own types so callers can branch on them; this enum
//! wraps them transparently.

use thiserror::Error;

use crate::db::ExecutionError;
use crate::safety::PolicyViolation;

/// Main error type for analyst operations.
#[derive(Error, Debug)]
pub enum AnalystError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query errors outside the execution contract (audit writes, bad rows).
    #[error("Query error: {0}")]
    Query(String),

    /// LLM API errors (rate limits, auth, timeouts, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Candidate SQL rejected by the guardrail.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// Validated SQL failed while running.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl AnalystError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Llm(_) => "LLM Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
            Self::Policy(_) => "Policy Violation",
            Self::Execution(_) => "Execution Error",
        }
    }

    /// Returns true if the request loop may feed this error back to the
    /// generator and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Policy(_) | Self::Execution(_) | Self::Llm(_))
    }
}

/// Result type alias using AnalystError.
pub type Result<T> = std::result::Result<T, AnalystError>;
