//! Schema allowlist and reference validation.
//!
//! The allowlist is the ground truth for which tables and columns generated
//! SQL may touch. It is built once at start-up and never mutated.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use tracing::debug;

use super::parser::QueryFacts;
use super::PolicyViolation;

/// Aggregate names that show up as bare identifiers in some dialects.
const AGGREGATE_NAMES: &[&str] = &["count", "sum", "avg", "min", "max"];

/// A foreign-key style hint rendered into generator prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl Relationship {
    pub fn new(from: (&str, &str), to: (&str, &str)) -> Self {
        Self {
            from_table: from.0.to_lowercase(),
            from_column: from.1.to_lowercase(),
            to_table: to.0.to_lowercase(),
            to_column: to.1.to_lowercase(),
        }
    }
}

/// Tables and columns that generated SQL may reference.
#[derive(Debug, Clone, Default)]
pub struct SchemaAllowlist {
    /// Table name to ordered column list, in insertion order.
    tables: Vec<(String, Vec<String>)>,
    blocked: BTreeSet<String>,
    relationships: Vec<Relationship>,
    summary: String,
}

impl SchemaAllowlist {
    /// Creates an empty allowlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pharmaceutical sales dataset.
    pub fn pharma() -> Self {
        Self::new()
            .with_table("product", &["id", "name", "category", "unit_price", "created_at"])
            .with_table("territory", &["id", "name", "region", "country", "created_at"])
            .with_table(
                "hcp",
                &[
                    "id",
                    "first_name",
                    "last_name",
                    "specialty",
                    "territory_id",
                    "email",
                    "created_at",
                ],
            )
            .with_table(
                "sales",
                &[
                    "id",
                    "product_id",
                    "territory_id",
                    "hcp_id",
                    "quantity",
                    "revenue",
                    "sale_date",
                    "created_at",
                ],
            )
            .with_blocked_table("audit_log")
            .with_relationship(Relationship::new(("sales", "product_id"), ("product", "id")))
            .with_relationship(Relationship::new(("sales", "territory_id"), ("territory", "id")))
            .with_relationship(Relationship::new(("sales", "hcp_id"), ("hcp", "id")))
            .with_relationship(Relationship::new(("hcp", "territory_id"), ("territory", "id")))
            .with_summary(
                "Pharmaceutical sales database with products, territories, \
                 healthcare professionals (HCPs), and sales transactions.",
            )
    }

    /// Adds a queryable table. Blocked names are never added.
    pub fn with_table(mut self, name: &str, columns: &[&str]) -> Self {
        let name = name.to_lowercase();
        if self.blocked.contains(&name) {
            return self;
        }
        let columns = columns.iter().map(|c| c.to_lowercase()).collect();
        match self.tables.iter_mut().find(|(table, _)| *table == name) {
            Some((_, existing)) => *existing = columns,
            None => self.tables.push((name, columns)),
        }
        self
    }

    /// Blocks a table. Takes precedence over any allowlist entry.
    pub fn with_blocked_table(mut self, name: &str) -> Self {
        let name = name.to_lowercase();
        self.tables.retain(|(table, _)| *table != name);
        self.blocked.insert(name);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn is_blocked(&self, table: &str) -> bool {
        self.blocked.contains(&table.to_lowercase())
    }

    /// Allowed columns for a table, or `None` if the table is not allowed.
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        let table = table.to_lowercase();
        self.tables
            .iter()
            .find(|(name, _)| *name == table)
            .map(|(_, columns)| columns.as_slice())
    }

    pub fn is_allowed(&self, table: &str) -> bool {
        self.columns(table).is_some()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|(name, _)| name.as_str())
    }

    pub fn blocked_tables(&self) -> impl Iterator<Item = &str> {
        self.blocked.iter().map(String::as_str)
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// One-line description of the dataset.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Renders the allowlist and relationship hints for generator prompts.
    pub fn describe(&self) -> String {
        let mut out = String::from("Available tables and columns:\n");
        for (table, columns) in &self.tables {
            let _ = write!(out, "\n{}: {}", table, columns.join(", "));
        }
        if !self.relationships.is_empty() {
            out.push_str("\n\nRelationships:");
            for rel in &self.relationships {
                let _ = write!(
                    out,
                    "\n- {}.{} -> {}.{}",
                    rel.from_table, rel.from_column, rel.to_table, rel.to_column
                );
            }
        }
        out
    }

    /// Checks every table and column reference.
    ///
    /// Table violations come first, in reference order, one per table.
    /// Qualified columns must exist on the table their qualifier resolves
    /// to. Unqualified columns are only checked loosely: they may be output
    /// aliases, and the table check has already kept blocked tables out of
    /// scope. An unqualified name that denotes a table in scope rather than
    /// one of its columns is reported as a wildcard.
    pub(crate) fn check_references(&self, facts: &QueryFacts) -> Vec<PolicyViolation> {
        let mut violations: Vec<PolicyViolation> = Vec::new();
        let mut reported = BTreeSet::new();
        // qualifier (table name or alias) -> allowed tables it may denote
        let mut scope: HashMap<&str, Vec<&str>> = HashMap::new();

        for table in &facts.tables {
            let violation = if self.is_blocked(&table.name) {
                Some(PolicyViolation::BlockedTable(table.name.clone()))
            } else if table.is_cte {
                continue;
            } else if table.schema.as_deref().is_some_and(|s| s != "public") {
                Some(PolicyViolation::UnknownTable(table.qualified_name()))
            } else if !self.is_allowed(&table.name) {
                Some(PolicyViolation::UnknownTable(table.name.clone()))
            } else {
                None
            };

            match violation {
                Some(v) => {
                    if !violations.contains(&v) {
                        violations.push(v);
                    }
                }
                None => {
                    let name = table.name.as_str();
                    scope.entry(name).or_default().push(name);
                    if let Some(alias) = &table.alias {
                        scope.entry(alias.as_str()).or_default().push(name);
                    }
                }
            }
        }

        for column in &facts.columns {
            match &column.qualifier {
                Some(qualifier) => {
                    if facts.local_names.contains(qualifier) {
                        continue;
                    }
                    let Some(tables) = scope.get(qualifier.as_str()) else {
                        debug!(qualifier = %qualifier, column = %column.column, "Unresolved column qualifier");
                        continue;
                    };
                    let known = tables.iter().any(|t| self.has_column(t, &column.column));
                    if !known && reported.insert(format!("{}.{}", qualifier, column.column)) {
                        violations.push(PolicyViolation::DisallowedColumn {
                            table: tables[0].to_string(),
                            column: column.column.clone(),
                        });
                    }
                }
                None => {
                    if AGGREGATE_NAMES.contains(&column.column.as_str()) {
                        continue;
                    }
                    let known = scope
                        .values()
                        .flatten()
                        .any(|t| self.has_column(t, &column.column));
                    if known {
                        continue;
                    }
                    // A bare table name or alias is a whole-row value.
                    if scope.contains_key(column.column.as_str()) {
                        let wildcard = format!("{}.*", column.column);
                        if reported.insert(wildcard.clone()) {
                            violations.push(PolicyViolation::SelectStar(wildcard));
                        }
                    } else {
                        debug!(column = %column.column, "Unqualified name not found in referenced tables");
                    }
                }
            }
        }

        violations
    }

    fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .is_some_and(|columns| columns.iter().any(|c| c == column))
    }
}
