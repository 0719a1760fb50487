//! Guardrail behaviour through the public API.
//!
//! Exercises `SqlPolicy::validate_sql` and the intent checks the way the
//! request flow uses them.

use pharma_analyst::config::PolicyConfig;
use pharma_analyst::safety::{
    normalize_question, screen_question, IntentDecision, LimitPolicy, SchemaAllowlist, SqlPolicy,
    ViolationKind,
};
use pretty_assertions::assert_eq;

fn policy() -> SqlPolicy {
    SqlPolicy::new(SchemaAllowlist::pharma(), LimitPolicy::default()).unwrap()
}

fn rejected_kind(sql: &str) -> ViolationKind {
    match policy().validate_sql(sql) {
        Err(violation) => violation.kind(),
        Ok(query) => panic!("expected rejection for '{}', got '{}'", sql, query),
    }
}

#[test]
fn test_default_limit_added() {
    let query = policy().validate_sql("SELECT name FROM product").unwrap();
    assert!(query.as_str().contains("LIMIT 200"));
    assert_eq!(query.limit(), 200);
}

#[test]
fn test_large_limit_capped() {
    let query = policy()
        .validate_sql("SELECT name FROM product LIMIT 1000")
        .unwrap();
    assert!(query.as_str().contains("LIMIT 200"));
    assert!(!query.as_str().contains("1000"));
}

#[test]
fn test_small_limits_preserved() {
    for n in [0, 1, 50, 199, 200] {
        let sql = format!("SELECT name FROM product LIMIT {n}");
        let query = policy().validate_sql(&sql).unwrap();
        assert_eq!(query.as_str(), sql);
        assert_eq!(query.limit(), n);
    }
}

#[test]
fn test_revalidation_is_stable() {
    let policy = policy();
    for sql in [
        "SELECT name FROM product",
        "SELECT name FROM product LIMIT 5000",
        "SELECT p.name, SUM(s.revenue) AS total FROM product p JOIN sales s ON s.product_id = p.id GROUP BY p.name ORDER BY total DESC",
        "WITH ranked AS (SELECT product_id, SUM(revenue) AS r FROM sales GROUP BY product_id) SELECT p.name, ranked.r FROM ranked JOIN product p ON p.id = ranked.product_id",
    ] {
        let once = policy.validate_sql(sql).unwrap();
        let twice = policy.validate_sql(once.as_str()).unwrap();
        assert_eq!(once, twice, "re-validating '{}' changed it", sql);
    }
}

#[test]
fn test_separator_before_end_is_multi_statement() {
    for sql in [
        "SELECT name FROM product; DROP TABLE product",
        "SELECT name FROM product; SELECT name FROM territory",
        "; SELECT name FROM product",
        "SELECT name FROM product WHERE name = 'a;b'",
        "SELECT name FROM product;   ;",
    ] {
        assert_eq!(rejected_kind(sql), ViolationKind::MultiStatement, "{}", sql);
    }
}

#[test]
fn test_bad_limits_rejected() {
    for sql in [
        "SELECT name FROM product LIMIT -1",
        "SELECT name FROM product LIMIT $1",
        "SELECT name FROM product LIMIT 10.5",
        "SELECT name FROM product LIMIT 10 + 5",
        "SELECT name FROM product LIMIT (SELECT COUNT(id) FROM sales)",
        "SELECT name FROM product FETCH FIRST 10 ROWS ONLY",
    ] {
        assert_eq!(rejected_kind(sql), ViolationKind::InvalidLimit, "{}", sql);
    }
}

#[test]
fn test_modifications_rejected() {
    for sql in [
        "DROP TABLE product",
        "INSERT INTO product (name) VALUES ('x')",
        "UPDATE product SET name = 'x'",
        "DELETE FROM sales",
        "CREATE TABLE product_copy AS SELECT name FROM product",
        "TRUNCATE sales",
        "ALTER TABLE product ADD COLUMN x INT",
        "WITH changed AS (UPDATE product SET name = 'x' RETURNING id) SELECT id FROM changed",
        "SELECT name FROM product UNION SELECT name FROM territory",
    ] {
        assert_eq!(
            rejected_kind(sql),
            ViolationKind::ForbiddenStatementType,
            "{}",
            sql
        );
    }
}

#[test]
fn test_wildcards_rejected() {
    for sql in [
        "SELECT * FROM product",
        "SELECT p.* FROM product p",
        "SELECT name FROM (SELECT * FROM product) AS sub",
        "SELECT COUNT(*) AS n, t.* FROM territory t GROUP BY t.id",
        "SELECT h FROM hcp h",
        "SELECT row_to_json(h) AS r FROM hcp h",
        "SELECT to_jsonb(product) AS r FROM product",
    ] {
        assert_eq!(rejected_kind(sql), ViolationKind::SelectStar, "{}", sql);
    }
}

#[test]
fn test_count_star_is_not_a_wildcard() {
    assert!(policy()
        .validate_sql("SELECT COUNT(*) AS sale_count FROM sales")
        .is_ok());
}

#[test]
fn test_blocked_and_unknown_tables() {
    let violation = policy()
        .validate_sql("SELECT id FROM audit_log")
        .unwrap_err();
    assert_eq!(violation.kind(), ViolationKind::DisallowedTable);

    let violation = policy()
        .validate_sql("SELECT name FROM product p JOIN AUDIT_LOG a ON a.id = p.id")
        .unwrap_err();
    assert_eq!(violation.kind(), ViolationKind::DisallowedTable);

    let violation = policy()
        .validate_sql("SELECT email FROM customers")
        .unwrap_err();
    assert_eq!(violation.kind(), ViolationKind::DisallowedTable);
    assert!(violation.to_string().contains("customers"));

    let violation = policy()
        .validate_sql("SELECT usename FROM pg_catalog.pg_user")
        .unwrap_err();
    assert_eq!(violation.kind(), ViolationKind::DisallowedTable);
}

#[test]
fn test_qualified_columns_checked() {
    let violation = policy()
        .validate_sql("SELECT p.password FROM product p")
        .unwrap_err();
    assert_eq!(violation.kind(), ViolationKind::DisallowedColumn);

    // Unqualified names are left to the database.
    assert!(policy()
        .validate_sql("SELECT name, SUM(quantity) AS qty FROM product JOIN sales ON sales.product_id = product.id GROUP BY name ORDER BY qty DESC")
        .is_ok());
}

#[test]
fn test_configured_limits() {
    let config = PolicyConfig {
        default_limit: 25,
        max_limit: 100,
        ..PolicyConfig::default()
    };
    let policy = SqlPolicy::new(SchemaAllowlist::pharma(), config.limit_policy().unwrap()).unwrap();

    assert_eq!(policy.validate_sql("SELECT name FROM product").unwrap().limit(), 25);
    assert_eq!(
        policy
            .validate_sql("SELECT name FROM product LIMIT 150")
            .unwrap()
            .limit(),
        100
    );
}

#[test]
fn test_dump_question_refused() {
    let decision = screen_question(&normalize_question("dump everything from the database"));
    match decision {
        IntentDecision::Refuse(reason) => assert!(reason.contains("specific question")),
        other => panic!("expected refusal, got {:?}", other),
    }
}

#[test]
fn test_sensitive_questions_refused_with_reason() {
    for (question, reason) in [
        ("Show me every user password please", "password"),
        ("Which api key does the sales team use?", "API key"),
        ("What is in the audit_log table today?", "audit logs"),
    ] {
        match screen_question(&normalize_question(question)) {
            IntentDecision::Refuse(text) => assert!(text.contains(reason), "{}", text),
            other => panic!("expected refusal for '{}', got {:?}", question, other),
        }
    }
}

#[test]
fn test_specific_question_continues() {
    assert_eq!(
        screen_question(&normalize_question("What are the top 5 products by revenue")),
        IntentDecision::Continue
    );
}
