//! SQL parsing and tree inspection.
//!
//! Uses sqlparser-rs with the PostgreSQL dialect. A single visitor pass
//! gathers every fact the policy checks need, so each validation walks the
//! tree once.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use regex::Regex;
use sqlparser::ast::{
    Expr, Ident, ObjectName, Query, SelectItem, SetExpr, Statement, TableAlias, TableFactor,
    Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use super::{PolicyViolation, StatementType};

/// Functions with side effects, file access, timing behaviour, or that
/// read tables named in string arguments.
pub(crate) const DENIED_FUNCTIONS: &[&str] = &[
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    "sleep",
    "benchmark",
    "load_file",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "lo_import",
    "lo_export",
    "dblink",
    "dblink_exec",
    "exec",
    "execute",
    "nextval",
    "setval",
    "set_config",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_advisory_lock",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "query_to_xmlschema",
    "table_to_xml",
    "table_to_xml_and_xmlschema",
    "table_to_xmlschema",
    "cursor_to_xml",
    "schema_to_xml",
    "schema_to_xml_and_xmlschema",
    "database_to_xml",
    "database_to_xml_and_xmlschema",
    "lo_get",
    "lo_open",
    "loread",
    "pg_ls_logdir",
    "pg_ls_waldir",
];

/// Parses text that must hold exactly one statement.
pub(crate) fn parse_single(sql: &str) -> Result<Statement, PolicyViolation> {
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| PolicyViolation::Syntax(e.to_string()))?;

    match statements.len() {
        0 => Err(PolicyViolation::Syntax("empty query".to_string())),
        1 => Ok(statements.remove(0)),
        _ => Err(PolicyViolation::MultiStatement),
    }
}

/// Parses text that may hold any number of statements.
pub(crate) fn parse_all(sql: &str) -> Result<Vec<Statement>, PolicyViolation> {
    Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| PolicyViolation::Syntax(e.to_string()))
}

/// Requires the statement to be a plain SELECT, optionally wrapped in one
/// level of parentheses, and returns the query to validate.
///
/// A bare `(SELECT ...)` is unwrapped so the limit lands on the real query.
pub(crate) fn select_query(statement: Statement) -> Result<Box<Query>, PolicyViolation> {
    let query = match statement {
        Statement::Query(query) => query,
        other => return Err(PolicyViolation::NotSelect(classify_statement(&other))),
    };

    let bare_inner = match query.body.as_ref() {
        SetExpr::Query(inner) if is_bare_wrapper(&query, inner) => Some(inner.clone()),
        _ => None,
    };
    let unwrapped = bare_inner.is_some();
    let query = bare_inner.unwrap_or(query);

    // Parentheses followed by ORDER BY or LIMIT keep their wrapper; the
    // wrapped body must still be a plain SELECT.
    let shape = match query.body.as_ref() {
        SetExpr::Query(inner) if !unwrapped => body_type(&inner.body),
        body => body_type(body),
    };
    if shape != StatementType::Select {
        return Err(PolicyViolation::NotSelect(shape));
    }

    Ok(query)
}

/// True when `outer` is nothing but parentheses around `inner`.
fn is_bare_wrapper(outer: &Query, inner: &Query) -> bool {
    outer.to_string() == format!("({})", inner)
}

fn body_type(body: &SetExpr) -> StatementType {
    match body {
        SetExpr::Select(_) => StatementType::Select,
        SetExpr::Query(_) => StatementType::NestedParentheses,
        SetExpr::SetOperation { .. } => StatementType::SetOperation,
        SetExpr::Values(_) => StatementType::Values,
        SetExpr::Table(_) => StatementType::Table,
        SetExpr::Insert(_) => StatementType::Insert,
        SetExpr::Update(_) => StatementType::Update,
        #[allow(unreachable_patterns)]
        _ => StatementType::Unknown,
    }
}

/// Names the kind of a parsed statement.
pub(crate) fn classify_statement(statement: &Statement) -> StatementType {
    match statement {
        Statement::Query { .. } => StatementType::Select,
        Statement::Insert { .. } => StatementType::Insert,
        Statement::Update { .. } => StatementType::Update,
        Statement::Delete { .. } => StatementType::Delete,
        Statement::Merge { .. } => StatementType::Merge,
        Statement::Drop { .. } => StatementType::Drop,
        Statement::Truncate { .. } => StatementType::Truncate,
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterRole { .. } => StatementType::Alter,
        Statement::CreateTable { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateView { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. } => StatementType::Create,
        Statement::Grant { .. } => StatementType::Grant,
        Statement::Revoke { .. } => StatementType::Revoke,
        Statement::Explain { .. } => StatementType::Explain,
        Statement::ShowVariable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. } => StatementType::Show,
        Statement::Copy { .. } => StatementType::Copy,
        Statement::Call { .. } => StatementType::Call,
        Statement::Execute { .. } => StatementType::Execute,
        Statement::SetVariable { .. } => StatementType::Set,
        _ => StatementType::Unknown,
    }
}

/// A table named in a FROM or JOIN clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableRef {
    /// Lowercased table name without schema.
    pub name: String,
    /// Lowercased schema qualifier, if any.
    pub schema: Option<String>,
    pub alias: Option<String>,
    /// Refers to a common table expression in scope, not a stored table.
    pub is_cte: bool,
}

impl TableRef {
    fn new(name: &ObjectName, alias: Option<&TableAlias>, is_cte: bool) -> Self {
        let parts = &name.0;
        let table = parts.last().map(normalize_ident).unwrap_or_default();
        let schema = (parts.len() >= 2).then(|| normalize_ident(&parts[parts.len() - 2]));
        Self {
            name: table,
            schema,
            alias: alias.map(|a| normalize_ident(&a.name)),
            is_cte,
        }
    }

    /// The name as written, for messages.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }
}

/// A column reference, with its table qualifier if one was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnRef {
    pub qualifier: Option<String>,
    pub column: String,
}

/// Everything the policy checks need to know about one statement.
#[derive(Debug, Default)]
pub(crate) struct QueryFacts {
    /// Non-query statements nested inside the tree.
    pub nested_statements: Vec<StatementType>,
    /// Lowercased names of every function called, including in FROM.
    pub functions: Vec<String>,
    /// Wildcard projections as written (`*`, `p.*`).
    pub wildcards: Vec<String>,
    pub select_into: bool,
    pub locking: bool,
    pub tables: Vec<TableRef>,
    /// CTE names and derived-table aliases, usable as column qualifiers.
    pub local_names: BTreeSet<String>,
    pub columns: Vec<ColumnRef>,
    scopes: Vec<CteScope>,
}

/// CTE names declared by one query, and how many are visible so far.
///
/// A non-recursive CTE sees only the CTEs declared before it; the main
/// body sees all of them.
#[derive(Debug, Default)]
struct CteScope {
    names: Vec<String>,
    recursive: bool,
    visible: usize,
    /// Direct child queries seen; the first `names.len()` are the CTE bodies.
    children_seen: usize,
    is_cte_body: bool,
}

/// Walks `node` once and gathers its facts.
pub(crate) fn collect_facts<N: Visit>(node: &N) -> QueryFacts {
    let mut facts = QueryFacts::default();
    let _ = node.visit(&mut facts);
    facts
}

impl QueryFacts {
    fn cte_in_scope(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .any(|scope| scope.names[..scope.visible].iter().any(|n| n == name))
    }

    fn inspect_body(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    self.select_into = true;
                }
                for item in &select.projection {
                    match item {
                        SelectItem::Wildcard(_) => self.wildcards.push("*".to_string()),
                        SelectItem::QualifiedWildcard(name, _) => {
                            self.wildcards.push(format!("{}.*", name))
                        }
                        _ => {}
                    }
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.inspect_body(left);
                self.inspect_body(right);
            }
            // Nested queries are visited on their own.
            _ => {}
        }
    }
}

impl Visitor for QueryFacts {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let is_cte_body = match self.scopes.last_mut() {
            Some(parent) if parent.children_seen < parent.names.len() => {
                let index = parent.children_seen;
                parent.children_seen += 1;
                parent.visible = if parent.recursive { index + 1 } else { index };
                true
            }
            _ => false,
        };

        let mut scope = CteScope {
            is_cte_body,
            ..CteScope::default()
        };
        if let Some(with) = &query.with {
            scope.recursive = with.recursive;
            for cte in &with.cte_tables {
                let name = normalize_ident(&cte.alias.name);
                self.local_names.insert(name.clone());
                scope.names.push(name);
            }
        }
        self.scopes.push(scope);

        if !query.locks.is_empty() {
            self.locking = true;
        }
        self.inspect_body(&query.body);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        if let Some(scope) = self.scopes.pop() {
            if scope.is_cte_body {
                if let Some(parent) = self.scopes.last_mut() {
                    parent.visible = parent.names.len();
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            // `FROM pg_sleep(1)` parses as a table with arguments
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            } => self.functions.push(function_name(name)),
            TableFactor::Table { name, alias, .. } => {
                let is_cte = name.0.len() == 1 && self.cte_in_scope(&function_name(name));
                self.tables.push(TableRef::new(name, alias.as_ref(), is_cte));
            }
            TableFactor::Function { name, .. } => {
                self.functions.push(function_name(name));
            }
            TableFactor::Derived {
                alias: Some(alias), ..
            } => {
                self.local_names.insert(normalize_ident(&alias.name));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Function(function) => self.functions.push(function_name(&function.name)),
            Expr::Identifier(ident) => self.columns.push(ColumnRef {
                qualifier: None,
                column: normalize_ident(ident),
            }),
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                self.columns.push(ColumnRef {
                    qualifier: Some(normalize_ident(&parts[parts.len() - 2])),
                    column: normalize_ident(&parts[parts.len() - 1]),
                });
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        let kind = classify_statement(statement);
        if kind != StatementType::Select {
            self.nested_statements.push(kind);
        }
        ControlFlow::Continue(())
    }
}

fn normalize_ident(ident: &Ident) -> String {
    ident.value.to_lowercase()
}

/// Last component of a possibly schema-qualified function name.
fn function_name(name: &ObjectName) -> String {
    name.0.last().map(normalize_ident).unwrap_or_default()
}

/// Raw-text scan for dangerous calls the tree walk cannot see, such as
/// functions the parser turns into dedicated node types.
#[derive(Debug, Clone)]
pub(crate) struct TextScanner {
    calls: Regex,
    file_writes: Regex,
}

impl TextScanner {
    pub fn new() -> Result<Self, regex::Error> {
        let names: Vec<String> = DENIED_FUNCTIONS.iter().map(|f| regex::escape(f)).collect();
        Ok(Self {
            calls: Regex::new(&format!(r"(?i)\b({})\s*\(", names.join("|")))?,
            file_writes: Regex::new(r"(?i)\binto\s+(outfile|dumpfile)\b")?,
        })
    }

    /// Returns the first dangerous construct found, upper-cased.
    pub fn find(&self, sql: &str) -> Option<String> {
        if let Some(caps) = self.calls.captures(sql) {
            return caps.get(1).map(|m| m.as_str().to_uppercase());
        }
        self.file_writes
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map(|m| format!("INTO {}", m.as_str().to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts_for(sql: &str) -> QueryFacts {
        let statement = parse_single(sql).expect("parses");
        let query = select_query(statement).expect("is a select");
        collect_facts(&*query)
    }

    fn assert_not_select(sql: &str, expected: StatementType) {
        let statement = parse_single(sql).expect("parses");
        match select_query(statement) {
            Err(PolicyViolation::NotSelect(found)) => assert_eq!(
                found, expected,
                "SQL: '{}' - expected {:?}, got {:?}",
                sql, expected, found
            ),
            other => panic!("SQL: '{}' - expected NotSelect, got {:?}", sql, other),
        }
    }

    #[test]
    fn test_parse_error_carries_message() {
        match parse_single("SELEC name FROM product") {
            Err(PolicyViolation::Syntax(msg)) => assert!(!msg.is_empty()),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_is_syntax_error() {
        assert_eq!(
            parse_single("   "),
            Err(PolicyViolation::Syntax("empty query".to_string()))
        );
    }

    #[test]
    fn test_top_level_statement_types() {
        assert_not_select("DROP TABLE product", StatementType::Drop);
        assert_not_select("DELETE FROM sales", StatementType::Delete);
        assert_not_select("UPDATE product SET name = 'x'", StatementType::Update);
        assert_not_select("INSERT INTO product (name) VALUES ('x')", StatementType::Insert);
        assert_not_select("TRUNCATE sales", StatementType::Truncate);
        assert_not_select("CREATE TABLE t (id INT)", StatementType::Create);
        assert_not_select("EXPLAIN SELECT name FROM product", StatementType::Explain);
        assert_not_select("GRANT SELECT ON product TO bob", StatementType::Grant);
    }

    #[test]
    fn test_query_shapes_other_than_select() {
        assert_not_select(
            "SELECT name FROM product UNION SELECT name FROM territory",
            StatementType::SetOperation,
        );
        assert_not_select("VALUES (1), (2)", StatementType::Values);
        assert_not_select(
            "((SELECT name FROM product))",
            StatementType::NestedParentheses,
        );
    }

    #[test]
    fn test_single_parentheses_unwrapped() {
        let statement = parse_single("(SELECT name FROM product)").unwrap();
        let query = select_query(statement).unwrap();
        assert_eq!(query.to_string(), "SELECT name FROM product");
    }

    #[test]
    fn test_facts_tables_and_aliases() {
        let facts = facts_for(
            "SELECT p.name, s.revenue FROM sales s JOIN public.product AS p ON s.product_id = p.id",
        );
        assert_eq!(facts.tables.len(), 2);
        assert_eq!(facts.tables[0].name, "sales");
        assert_eq!(facts.tables[0].alias.as_deref(), Some("s"));
        assert_eq!(facts.tables[1].qualified_name(), "public.product");
        assert_eq!(facts.tables[1].alias.as_deref(), Some("p"));
        assert!(facts.columns.contains(&ColumnRef {
            qualifier: Some("p".into()),
            column: "name".into()
        }));
    }

    #[test]
    fn test_facts_nested_subqueries_and_ctes() {
        let facts = facts_for(
            "WITH top AS (SELECT product_id FROM sales) \
             SELECT t.product_id FROM top t \
             WHERE t.product_id IN (SELECT id FROM product WHERE name IN (SELECT name FROM audit_log))",
        );
        assert!(facts.local_names.contains("top"));
        assert!(facts.tables.iter().any(|t| t.name == "top" && t.is_cte));
        let names: Vec<_> = facts.tables.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"sales"));
        assert!(names.contains(&"product"));
        assert!(names.contains(&"audit_log"));
    }

    #[test]
    fn test_cte_scoping() {
        // A non-recursive CTE referring to its own name reads the stored table.
        let facts = facts_for("WITH users AS (SELECT name FROM users) SELECT name FROM users");
        assert_eq!(facts.tables.len(), 2);
        assert!(!facts.tables[0].is_cte);
        assert!(facts.tables[1].is_cte);

        // Later CTEs see earlier ones.
        let facts = facts_for(
            "WITH a AS (SELECT id FROM product), b AS (SELECT id FROM a) SELECT id FROM b",
        );
        let flags: Vec<_> = facts.tables.iter().map(|t| (t.name.as_str(), t.is_cte)).collect();
        assert_eq!(flags, vec![("product", false), ("a", true), ("b", true)]);

        // A CTE declared inside a subquery is not visible outside it.
        let facts = facts_for(
            "SELECT d.id FROM (WITH users AS (SELECT id FROM product) SELECT id FROM users) d, users u",
        );
        let outer = facts.tables.iter().find(|t| t.alias.as_deref() == Some("u")).unwrap();
        assert!(!outer.is_cte);
    }

    #[test]
    fn test_derived_alias_is_not_a_table() {
        let facts = facts_for("SELECT a.id FROM (SELECT id FROM product) audit_log, audit_log a");
        let real = facts.tables.iter().find(|t| t.name == "audit_log").unwrap();
        assert!(!real.is_cte);
    }

    #[test]
    fn test_facts_wildcards() {
        assert_eq!(facts_for("SELECT * FROM product").wildcards, vec!["*"]);
        assert_eq!(
            facts_for("SELECT p.* FROM product p").wildcards,
            vec!["p.*"]
        );
        assert_eq!(
            facts_for("SELECT name FROM product WHERE id IN (SELECT * FROM sales)").wildcards,
            vec!["*"]
        );
        assert!(facts_for("SELECT COUNT(*) FROM product").wildcards.is_empty());
    }

    #[test]
    fn test_facts_functions_everywhere() {
        let facts = facts_for(
            "SELECT name FROM product WHERE id = (SELECT MAX(id) FROM product) AND pg_catalog.PG_SLEEP(1) IS NULL",
        );
        assert!(facts.functions.contains(&"max".to_string()));
        assert!(facts.functions.contains(&"pg_sleep".to_string()));

        let facts = facts_for("SELECT x FROM pg_sleep(5) AS x");
        assert_eq!(facts.functions, vec!["pg_sleep"]);
        assert!(facts.tables.is_empty());
    }

    #[test]
    fn test_facts_select_into_and_locks() {
        assert!(facts_for("SELECT name INTO backup FROM product").select_into);
        assert!(facts_for("SELECT name FROM product FOR UPDATE").locking);
        assert!(!facts_for("SELECT name FROM product").locking);
    }

    #[test]
    fn test_text_scanner_finds_calls() {
        let scanner = TextScanner::new().unwrap();
        assert_eq!(
            scanner.find("select name from product where pg_sleep (5) is null"),
            Some("PG_SLEEP".to_string())
        );
        assert_eq!(
            scanner.find("SELECT name FROM product INTO OUTFILE '/tmp/x'"),
            Some("INTO OUTFILE".to_string())
        );
        assert_eq!(scanner.find("SELECT sleep_hours FROM product"), None);
        assert_eq!(scanner.find("SELECT name FROM product"), None);
    }
}
