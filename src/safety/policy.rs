//! Policy orchestrator: the single entry point that turns candidate SQL
//! into a [`ValidatedQuery`] or a [`PolicyViolation`].

use tracing::debug;

use crate::error::{AnalystError, Result};

use super::allowlist::SchemaAllowlist;
use super::limit::LimitPolicy;
use super::parser::{self, QueryFacts, TextScanner, DENIED_FUNCTIONS};
use super::{PolicyViolation, StatementType, ValidatedQuery};

/// Validates and rewrites generated SQL.
///
/// Holds only immutable configuration, so one instance can be shared
/// across tasks behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SqlPolicy {
    allowlist: SchemaAllowlist,
    limits: LimitPolicy,
    scanner: TextScanner,
}

impl SqlPolicy {
    pub fn new(allowlist: SchemaAllowlist, limits: LimitPolicy) -> Result<Self> {
        let scanner = TextScanner::new()
            .map_err(|e| AnalystError::internal(format!("Invalid scanner pattern: {}", e)))?;
        Ok(Self {
            allowlist,
            limits,
            scanner,
        })
    }

    pub fn allowlist(&self) -> &SchemaAllowlist {
        &self.allowlist
    }

    pub fn limits(&self) -> LimitPolicy {
        self.limits
    }

    /// Validates candidate SQL, returning the rewritten query or the first
    /// violation found.
    ///
    /// Order: statement separators and dangerous call patterns in the raw
    /// text, then parsing, statement shape, tree-level dangerous constructs,
    /// wildcards, table and column references, and finally the limit. The
    /// result depends only on the input and this policy's configuration.
    pub fn validate_sql(&self, sql: &str) -> std::result::Result<ValidatedQuery, PolicyViolation> {
        let result = self.run_checks(sql);
        match &result {
            Ok(query) => debug!(limit = query.limit(), "SQL accepted"),
            Err(violation) => debug!(kind = %violation.kind(), "SQL rejected: {}", violation),
        }
        result
    }

    fn run_checks(&self, sql: &str) -> std::result::Result<ValidatedQuery, PolicyViolation> {
        let text = strip_terminator(sql);
        if text.contains(';') {
            return Err(PolicyViolation::MultiStatement);
        }
        if let Some(found) = self.scanner.find(text) {
            return Err(PolicyViolation::ForbiddenFunction(found));
        }

        let statement = parser::parse_single(text)?;
        let mut query = parser::select_query(statement)?;
        let facts = parser::collect_facts(&*query);

        check_dangerous(&facts)?;

        if let Some(wildcard) = facts.wildcards.first() {
            return Err(PolicyViolation::SelectStar(wildcard.clone()));
        }

        if let Some(violation) = self.allowlist.check_references(&facts).into_iter().next() {
            return Err(violation);
        }

        let limit = self.limits.enforce(&mut query)?;
        Ok(ValidatedQuery::new(query.to_string(), limit))
    }

    /// Reports every table and column reference outside the allowlist,
    /// without failing fast. Used for advisory checks; `validate_sql`
    /// already enforces the same rules.
    pub fn check_allowlist(&self, sql: &str) -> Vec<PolicyViolation> {
        match parser::parse_all(strip_terminator(sql)) {
            Ok(statements) => statements
                .iter()
                .flat_map(|statement| {
                    self.allowlist
                        .check_references(&parser::collect_facts(statement))
                })
                .collect(),
            Err(violation) => vec![violation],
        }
    }
}

/// Tree-level checks for anything that writes, locks, or calls a denied
/// function.
fn check_dangerous(facts: &QueryFacts) -> std::result::Result<(), PolicyViolation> {
    if let Some(kind) = facts.nested_statements.first() {
        return Err(PolicyViolation::ForbiddenOperation(kind.clone()));
    }
    if facts.select_into {
        return Err(PolicyViolation::ForbiddenOperation(StatementType::SelectInto));
    }
    if facts.locking {
        return Err(PolicyViolation::ForbiddenOperation(StatementType::Locking));
    }
    if let Some(name) = facts
        .functions
        .iter()
        .find(|f| DENIED_FUNCTIONS.contains(&f.as_str()))
    {
        return Err(PolicyViolation::ForbiddenFunction(name.to_uppercase()));
    }
    Ok(())
}

/// Trims whitespace and exactly one trailing `;`.
fn strip_terminator(sql: &str) -> &str {
    let trimmed = sql.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end()
}
