//! Row-limit enforcement.

use sqlparser::ast::{Expr, Query, UnaryOperator, Value};

use crate::error::{AnalystError, Result};

use super::{LimitProblem, PolicyViolation};

/// Default and maximum LIMIT values applied to every validated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    default_limit: u64,
    max_limit: u64,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            default_limit: 200,
            max_limit: 200,
        }
    }
}

impl LimitPolicy {
    /// Creates a limit policy, rejecting inconsistent values.
    pub fn new(default_limit: u64, max_limit: u64) -> Result<Self> {
        if max_limit == 0 {
            return Err(AnalystError::config("max_limit must be at least 1"));
        }
        if default_limit == 0 {
            return Err(AnalystError::config("default_limit must be at least 1"));
        }
        if default_limit > max_limit {
            return Err(AnalystError::config(format!(
                "default_limit ({}) cannot exceed max_limit ({})",
                default_limit, max_limit
            )));
        }
        Ok(Self {
            default_limit,
            max_limit,
        })
    }

    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }

    pub fn max_limit(&self) -> u64 {
        self.max_limit
    }

    /// Normalizes the LIMIT clause of the outermost query in place.
    ///
    /// A missing limit gets the default; a literal above the maximum is
    /// capped. Anything that is not a non-negative integer literal is
    /// refused, since a placeholder could be bound past the cap later.
    /// Returns the effective limit.
    pub(crate) fn enforce(&self, query: &mut Query) -> std::result::Result<u64, PolicyViolation> {
        if query.fetch.is_some() {
            return Err(PolicyViolation::InvalidLimit(LimitProblem::Fetch));
        }

        let effective = match &query.limit {
            None => self.default_limit,
            Some(expr) => literal_limit(expr)?.min(self.max_limit),
        };

        query.limit = Some(Expr::Value(Value::Number(effective.to_string(), false)));
        Ok(effective)
    }
}

fn literal_limit(expr: &Expr) -> std::result::Result<u64, PolicyViolation> {
    let problem = match expr {
        Expr::Value(Value::Number(text, _)) if text.starts_with('-') => LimitProblem::Negative,
        Expr::Value(Value::Number(text, _)) => {
            if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                // Out-of-range integers are capped like any other large value.
                return Ok(text.parse().unwrap_or(u64::MAX));
            }
            LimitProblem::NonInteger
        }
        Expr::Value(Value::Placeholder(_)) => LimitProblem::Parameterized,
        Expr::Value(_) => LimitProblem::NonInteger,
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } if matches!(expr.as_ref(), Expr::Value(Value::Number(..))) => LimitProblem::Negative,
        _ => LimitProblem::Expression,
    };
    Err(PolicyViolation::InvalidLimit(problem))
}
