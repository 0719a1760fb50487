//! SQL guardrail.
//!
//! Decides whether LLM-generated SQL may run against the sales database,
//! rewrites its row limit, and reports precise violations otherwise.
//! Everything here is synchronous and free of shared mutable state, so a
//! single [`SqlPolicy`] can be used from any number of tasks at once.

mod allowlist;
mod intent;
mod limit;
mod parser;
mod policy;

pub use allowlist::{Relationship, SchemaAllowlist};
pub use intent::{
    check_ambiguity, check_dump_request, check_sensitive_request, normalize_question,
    screen_question, IntentDecision,
};
pub use limit::LimitPolicy;
pub use policy::SqlPolicy;

use std::fmt;

use thiserror::Error;

/// The type of SQL statement (or statement shape) detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Drop,
    Truncate,
    Alter,
    Create,
    Grant,
    Revoke,
    Explain,
    Show,
    Merge,
    Copy,
    Call,
    Execute,
    Set,
    /// UNION / INTERSECT / EXCEPT at the top level.
    SetOperation,
    /// A bare VALUES list.
    Values,
    /// `TABLE name` shorthand.
    Table,
    /// `SELECT ... INTO new_table`.
    SelectInto,
    /// `FOR UPDATE` / `FOR SHARE` row locks.
    Locking,
    /// More than one level of parentheses around the query.
    NestedParentheses,
    /// Statement type could not be determined.
    Unknown,
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Drop => write!(f, "DROP"),
            Self::Truncate => write!(f, "TRUNCATE"),
            Self::Alter => write!(f, "ALTER"),
            Self::Create => write!(f, "CREATE"),
            Self::Grant => write!(f, "GRANT"),
            Self::Revoke => write!(f, "REVOKE"),
            Self::Explain => write!(f, "EXPLAIN"),
            Self::Show => write!(f, "SHOW"),
            Self::Merge => write!(f, "MERGE"),
            Self::Copy => write!(f, "COPY"),
            Self::Call => write!(f, "CALL"),
            Self::Execute => write!(f, "EXECUTE"),
            Self::Set => write!(f, "SET"),
            Self::SetOperation => write!(f, "UNION/INTERSECT/EXCEPT"),
            Self::Values => write!(f, "VALUES"),
            Self::Table => write!(f, "TABLE"),
            Self::SelectInto => write!(f, "SELECT INTO"),
            Self::Locking => write!(f, "FOR UPDATE/SHARE"),
            Self::NestedParentheses => write!(f, "Nested parentheses"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Machine-readable category of a [`PolicyViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    Syntax,
    MultiStatement,
    ForbiddenStatementType,
    ForbiddenFunction,
    SelectStar,
    DisallowedTable,
    DisallowedColumn,
    InvalidLimit,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "parse-error"),
            Self::MultiStatement => write!(f, "multi-statement"),
            Self::ForbiddenStatementType => write!(f, "forbidden-statement-type"),
            Self::ForbiddenFunction => write!(f, "forbidden-function"),
            Self::SelectStar => write!(f, "select-star"),
            Self::DisallowedTable => write!(f, "disallowed-table"),
            Self::DisallowedColumn => write!(f, "disallowed-column"),
            Self::InvalidLimit => write!(f, "invalid-limit"),
        }
    }
}

/// Why a LIMIT clause was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitProblem {
    NonInteger,
    Negative,
    Parameterized,
    Expression,
    Fetch,
}

impl fmt::Display for LimitProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonInteger => write!(
                f,
                "LIMIT must be an integer value. Non-integer LIMIT values are not allowed."
            ),
            Self::Negative => write!(f, "LIMIT cannot be negative."),
            Self::Parameterized => write!(
                f,
                "Parameterized LIMIT values are not allowed. Please specify a concrete integer LIMIT."
            ),
            Self::Expression => write!(
                f,
                "LIMIT must be a simple integer value. Expressions and variables are not allowed."
            ),
            Self::Fetch => write!(
                f,
                "FETCH FIRST is not allowed. Use a LIMIT clause with an integer value instead."
            ),
        }
    }
}

/// A structured, user-presentable reason a candidate query was rejected.
///
/// The `Display` text is fed back to the generator on retry and surfaced
/// to the user once the retry budget is exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("Invalid SQL syntax: {0}")]
    Syntax(String),

    #[error("Multiple SQL statements are not allowed. Please submit one query at a time.")]
    MultiStatement,

    /// The top-level statement is not a plain SELECT.
    #[error("Only SELECT statements are allowed. {0} is prohibited.")]
    NotSelect(StatementType),

    /// A data-modifying or otherwise forbidden construct nested in the query.
    #[error("Forbidden operation detected: {0}. Only SELECT queries are allowed.")]
    ForbiddenOperation(StatementType),

    #[error("Forbidden function: {0}")]
    ForbiddenFunction(String),

    #[error("SELECT {0} is not allowed. Please specify the columns you need.")]
    SelectStar(String),

    #[error("Access to table '{0}' is not permitted")]
    BlockedTable(String),

    #[error("Unknown table: '{0}'")]
    UnknownTable(String),

    #[error("Unknown column '{column}' on table '{table}'")]
    DisallowedColumn { table: String, column: String },

    #[error("{0}")]
    InvalidLimit(LimitProblem),
}

impl PolicyViolation {
    /// Returns the violation category.
    pub fn kind(&self) -> ViolationKind {
        match self {
            Self::Syntax(_) => ViolationKind::Syntax,
            Self::MultiStatement => ViolationKind::MultiStatement,
            Self::NotSelect(_) | Self::ForbiddenOperation(_) => {
                ViolationKind::ForbiddenStatementType
            }
            Self::ForbiddenFunction(_) => ViolationKind::ForbiddenFunction,
            Self::SelectStar(_) => ViolationKind::SelectStar,
            Self::BlockedTable(_) | Self::UnknownTable(_) => ViolationKind::DisallowedTable,
            Self::DisallowedColumn { .. } => ViolationKind::DisallowedColumn,
            Self::InvalidLimit(_) => ViolationKind::InvalidLimit,
        }
    }
}

/// SQL text that has passed every guardrail check and carries a normalized
/// LIMIT clause. This is the only SQL the execution layer accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    limit: u64,
}

impl ValidatedQuery {
    pub(crate) fn new(sql: String, limit: u64) -> Self {
        Self { sql, limit }
    }

    /// The validated SQL text.
    pub fn as_str(&self) -> &str {
        &self.sql
    }

    /// The effective row cap written into the LIMIT clause.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn into_string(self) -> String {
        self.sql
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}
