//! Pharma Analyst - natural-language questions over pharmaceutical sales data.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cli::{Cli, Command};
use pharma_analyst::agent::{AgentResponse, Analyst, LlmSqlGenerator, Outcome};
use pharma_analyst::audit::{AuditSink, PostgresAuditSink, TracingAuditSink};
use pharma_analyst::config::Config;
use pharma_analyst::db::{self, DatabaseClient, MockDatabaseClient};
use pharma_analyst::llm::{create_client, LlmProvider};
use pharma_analyst::logging;
use pharma_analyst::safety::{SchemaAllowlist, SqlPolicy};

fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    match cli.log_path() {
        Some(path) => logging::init_file_logging(&path),
        None => logging::init_stderr_logging(),
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let limits = config.policy.limit_policy()?;
    let policy = Arc::new(SqlPolicy::new(SchemaAllowlist::pharma(), limits)?);

    match &cli.command {
        Command::Schema => {
            println!("{}", policy.allowlist().summary());
            println!();
            println!("{}", policy.allowlist().describe());
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { sql } => Ok(check(&policy, sql)),
        Command::Ask { json, .. } => {
            let question = cli.command.question().unwrap_or_default();
            ask(&cli, &config, policy, &question, *json).await
        }
    }
}

/// Validates SQL and prints the rewritten query or the violation.
fn check(policy: &SqlPolicy, sql: &str) -> ExitCode {
    match policy.validate_sql(sql) {
        Ok(query) => {
            println!("{query}");
            ExitCode::SUCCESS
        }
        Err(violation) => {
            println!("Rejected ({}): {}", violation.kind(), violation);
            let advisory = policy.check_allowlist(sql);
            if !advisory.is_empty() {
                println!();
                println!("Allowlist findings:");
                for finding in advisory {
                    println!("  - {finding}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn ask(
    cli: &Cli,
    config: &Config,
    policy: Arc<SqlPolicy>,
    question: &str,
    json: bool,
) -> Result<ExitCode> {
    let provider_name = cli.llm.as_deref().unwrap_or(config.llm.provider.as_str());
    let provider: LlmProvider = provider_name.parse()?;
    let llm = create_client(provider, &config.llm, None)?;
    let generator = Arc::new(LlmSqlGenerator::new(Arc::from(llm)));

    let (db, audit): (Arc<dyn DatabaseClient>, Arc<dyn AuditSink>) = if cli.mock_db {
        (Arc::new(MockDatabaseClient::new()), Arc::new(TracingAuditSink))
    } else {
        let connection = config.resolve_connection(cli.connection.as_deref())?;
        info!("Connecting to {}", connection.display_string());
        let client = db::connect(&connection)
            .await
            .with_context(|| format!("Failed to connect to {}", connection.display_string()))?;
        let audit = PostgresAuditSink::new(client.pool().clone());
        (Arc::new(client), Arc::new(audit))
    };

    let analyst = Analyst::new(policy, generator, db.clone(), audit, config.policy);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let session_id = uuid::Uuid::new_v4().to_string();
    let response = analyst.ask(&session_id, question, cancel).await;

    analyst.flush().await;
    db.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }

    Ok(match response.outcome {
        Outcome::Answered => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_response(response: &AgentResponse) {
    println!("{}", response.answer);

    if let Some(sql) = &response.sql {
        println!();
        if response.executed() {
            println!("SQL:");
        } else {
            println!("Last attempted SQL (no result):");
        }
        println!("{sql}");
    }

    if let Some(result) = &response.result {
        println!();
        println!("{}", result.to_text_table());
        if let Some(warning) = result.truncation_warning() {
            println!("{warning}");
        }
    }

    if !response.assumptions.is_empty() {
        println!();
        println!("Assumptions:");
        for assumption in &response.assumptions {
            println!("  - {assumption}");
        }
    }

    if !response.follow_up_questions.is_empty() {
        println!();
        println!("You could also ask:");
        for question in &response.follow_up_questions {
            println!("  - {question}");
        }
    }
}
