//! Configuration loading from files on disk.

use std::io::Write;

use pharma_analyst::config::{Config, PolicyConfig};
use pharma_analyst::error::AnalystError;
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
[llm]
provider = "mock"
model = "gpt-4o"

[connections.default]
host = "db.internal"
port = 5433
database = "pharma"
user = "analyst_ro"

[policy]
default_limit = 50
max_limit = 100
statement_timeout_secs = 10
max_attempts = 2
"#,
    );

    let config = Config::load_from_file(file.path()).unwrap();
    assert_eq!(config.llm.provider, "mock");
    assert_eq!(config.llm.timeout_secs, 30);
    assert_eq!(
        config.policy,
        PolicyConfig {
            default_limit: 50,
            max_limit: 100,
            statement_timeout_secs: 10,
            max_attempts: 2,
        }
    );

    let connection = config.get_connection(None).unwrap();
    assert_eq!(connection.host.as_deref(), Some("db.internal"));
    assert_eq!(connection.port, 5433);
    assert_eq!(connection.display_string(), "pharma @ db.internal:5433");
}

#[test]
fn test_policy_section_is_optional() {
    let file = write_config("[llm]\nprovider = \"openai\"\n");
    let config = Config::load_from_file(file.path()).unwrap();
    assert_eq!(config.policy, PolicyConfig::default());
    assert_eq!(config.policy.limit_policy().unwrap().max_limit(), 200);
}

#[test]
fn test_inconsistent_limits_rejected() {
    let file = write_config("[policy]\ndefault_limit = 500\nmax_limit = 100\n");
    let config = Config::load_from_file(file.path()).unwrap();

    let err = config.policy.limit_policy().unwrap_err();
    assert!(matches!(err, AnalystError::Config(_)));
    assert!(err.to_string().contains("default_limit (500) cannot exceed max_limit (100)"));
}

#[test]
fn test_parse_error_names_file() {
    let file = write_config("[policy\nmax_limit = ");
    let err = Config::load_from_file(file.path()).unwrap_err();

    assert!(matches!(err, AnalystError::Config(_)));
    assert!(err
        .to_string()
        .contains(&file.path().display().to_string()));
}

#[test]
fn test_unknown_named_connection() {
    let file = write_config("[connections.default]\nhost = \"localhost\"\n");
    let config = Config::load_from_file(file.path()).unwrap();

    let err = config.resolve_connection(Some("reporting")).unwrap_err();
    assert!(err.to_string().contains("No connection named 'reporting'"));
}
