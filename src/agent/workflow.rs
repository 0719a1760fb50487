//! Request state machine.
//!
//! `normalize -> screen -> generate -> validate -> execute -> summarize`,
//! with validation and execution failures fed back to the generator under
//! one shared attempt budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::agent::generator::SqlGenerator;
use crate::audit::{spawn_record, AuditRecord, AuditSink};
use crate::config::PolicyConfig;
use crate::db::{DatabaseClient, ExecutionLimits, QueryResult};
use crate::llm::prompt::SummaryContext;
use crate::safety::{normalize_question, screen_question, IntentDecision, SqlPolicy, ValidatedQuery};

/// Rows shown to the summarizer.
const SUMMARY_ROWS: usize = 50;

const MAX_FOLLOW_UPS: usize = 3;

const CLARIFY_ANSWER: &str = "I'd like to help, but I need a bit more information to give you \
     an accurate answer. Please see the follow-up questions below.";

const APOLOGY: &str = "Sorry, something went wrong while preparing your answer. Please try again.";

const CANCELLED_ANSWER: &str = "Request cancelled.";

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Query ran and was summarized.
    Answered,
    /// Refused by an intent check before any SQL was generated.
    Refused,
    /// Too vague; clarifying questions returned instead.
    Ambiguous,
    /// The attempt budget ran out.
    Exhausted,
    Cancelled,
    /// Unexpected failure, reported as a generic apology.
    Failed,
}

/// Everything returned to the user for one question.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub outcome: Outcome,
    pub answer: String,
    /// The validated SQL that ran, or when attempts ran out the last
    /// candidate, which was rejected or failed. See [`AgentResponse::executed`].
    pub sql: Option<String>,
    pub result: Option<QueryResult>,
    pub assumptions: Vec<String>,
    pub follow_up_questions: Vec<String>,
    #[serde(skip)]
    pub runtime: Duration,
}

impl AgentResponse {
    fn new(outcome: Outcome, answer: impl Into<String>) -> Self {
        Self {
            outcome,
            answer: answer.into(),
            sql: None,
            result: None,
            assumptions: Vec::new(),
            follow_up_questions: Vec::new(),
            runtime: Duration::ZERO,
        }
    }

    fn with_follow_ups(mut self, questions: Vec<String>) -> Self {
        self.follow_up_questions = questions;
        self
    }

    pub fn row_count(&self) -> usize {
        self.result.as_ref().map_or(0, QueryResult::row_count)
    }

    /// True when `sql` passed validation and returned a result.
    pub fn executed(&self) -> bool {
        self.sql.is_some() && self.result.is_some()
    }
}

/// Per-request retry state, passed by value between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempts_remaining: u32,
    /// Errors from the last failed cycle, fed to the next fix request.
    pub last_errors: Vec<String>,
    /// Latest SQL produced, validated or not.
    pub candidate_sql: Option<String>,
    /// Whether the last failure came from the database rather than the
    /// guardrail or the generator.
    pub execution_failed: bool,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_remaining: max_attempts,
            last_errors: Vec::new(),
            candidate_sql: None,
            execution_failed: false,
        }
    }

    /// Consumes one attempt and remembers why it failed.
    pub fn fail(self, failure: CycleFailure) -> Self {
        Self {
            attempts_remaining: self.attempts_remaining.saturating_sub(1),
            last_errors: vec![failure.error],
            candidate_sql: failure.candidate.or(self.candidate_sql),
            execution_failed: failure.stage == Stage::Execution,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_remaining == 0
    }

    /// Whether the next cycle repairs earlier SQL rather than starting over.
    fn should_fix(&self) -> bool {
        !self.last_errors.is_empty() && self.candidate_sql.is_some()
    }
}

/// Where a cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generation,
    Validation,
    Execution,
}

/// A failed generate-validate-execute cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailure {
    pub stage: Stage,
    pub candidate: Option<String>,
    pub error: String,
}

struct CycleSuccess {
    raw_sql: String,
    query: ValidatedQuery,
    result: QueryResult,
}

/// Answers natural-language questions about the sales data.
pub struct Analyst {
    policy: Arc<SqlPolicy>,
    generator: Arc<dyn SqlGenerator>,
    db: Arc<dyn DatabaseClient>,
    audit: Arc<dyn AuditSink>,
    config: PolicyConfig,
    schema_description: String,
    /// Pending audit writes.
    tasks: TaskTracker,
}

impl Analyst {
    pub fn new(
        policy: Arc<SqlPolicy>,
        generator: Arc<dyn SqlGenerator>,
        db: Arc<dyn DatabaseClient>,
        audit: Arc<dyn AuditSink>,
        config: PolicyConfig,
    ) -> Self {
        let schema_description = policy.allowlist().describe();
        Self {
            policy,
            generator,
            db,
            audit,
            config,
            schema_description,
            tasks: TaskTracker::new(),
        }
    }

    pub fn policy(&self) -> &SqlPolicy {
        &self.policy
    }

    /// Waits for outstanding audit writes. Further `ask` calls still
    /// record, but are no longer waited on.
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Runs one question through the pipeline and audits the outcome.
    ///
    /// Cancelling `cancel` drops any in-flight generation or database
    /// call; the transaction is rolled back when its connection is released.
    pub async fn ask(
        &self,
        session_id: &str,
        question: &str,
        cancel: CancellationToken,
    ) -> AgentResponse {
        let started = Instant::now();

        let mut response = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!(session_id, "Request cancelled");
                AgentResponse::new(Outcome::Cancelled, CANCELLED_ANSWER)
            }
            response = self.run(question) => response,
        };
        response.runtime = started.elapsed();

        info!(
            session_id,
            outcome = ?response.outcome,
            rows = response.row_count(),
            elapsed_ms = response.runtime.as_millis() as u64,
            "Request finished"
        );

        spawn_record(
            &self.tasks,
            self.audit.clone(),
            self.audit_record(session_id, question, &response),
        );
        response
    }

    async fn run(&self, question: &str) -> AgentResponse {
        let normalized = normalize_question(question);

        match screen_question(&normalized) {
            IntentDecision::Refuse(reason) => {
                debug!("Question refused: {}", reason);
                return AgentResponse::new(Outcome::Refused, reason);
            }
            IntentDecision::Clarify(questions) => {
                return AgentResponse::new(Outcome::Ambiguous, CLARIFY_ANSWER)
                    .with_follow_ups(questions);
            }
            IntentDecision::Continue => {}
        }

        let mut state = RetryState::new(self.config.max_attempts);
        loop {
            match self.cycle(&normalized, &state).await {
                Ok(success) => return self.finish(&normalized, success).await,
                Err(failure) => {
                    debug!(stage = ?failure.stage, "Attempt failed: {}", failure.error);
                    state = state.fail(failure);
                    if state.is_exhausted() {
                        return exhausted(state);
                    }
                }
            }
        }
    }

    /// One generate (or fix), validate and execute pass.
    async fn cycle(
        &self,
        question: &str,
        state: &RetryState,
    ) -> std::result::Result<CycleSuccess, CycleFailure> {
        let generated = match (&state.candidate_sql, state.should_fix()) {
            (Some(previous), true) => {
                self.generator
                    .fix(
                        previous,
                        &state.last_errors.join("; "),
                        &self.schema_description,
                        question,
                    )
                    .await
            }
            _ => self.generator.generate(question, &self.schema_description).await,
        };

        let raw_sql = generated.map_err(|e| CycleFailure {
            stage: Stage::Generation,
            candidate: None,
            error: e.to_string(),
        })?;

        let query = self.policy.validate_sql(&raw_sql).map_err(|violation| CycleFailure {
            stage: Stage::Validation,
            candidate: Some(raw_sql.clone()),
            error: violation.to_string(),
        })?;

        let limits = ExecutionLimits::for_query(&query, &self.config);
        let result = self
            .db
            .execute(&query, limits)
            .await
            .map_err(|e| CycleFailure {
                stage: Stage::Execution,
                candidate: Some(query.to_string()),
                error: e.to_string(),
            })?;

        Ok(CycleSuccess {
            raw_sql,
            query,
            result,
        })
    }

    async fn finish(&self, question: &str, success: CycleSuccess) -> AgentResponse {
        let CycleSuccess {
            raw_sql,
            query,
            result,
        } = success;

        if let Some(warning) = result.truncation_warning() {
            warn!("{}", warning);
        }

        let assumptions = assumptions_for(&raw_sql);
        let columns = result.column_names();
        let rows_json =
            serde_json::to_string_pretty(&result.preview_json(SUMMARY_ROWS)).unwrap_or_default();
        let context = SummaryContext {
            question,
            sql: query.as_str(),
            columns: &columns,
            rows_json: &rows_json,
            assumptions: &assumptions,
            schema_summary: self.policy.allowlist().summary(),
        };

        let (outcome, answer) = match self.generator.summarize(&context).await {
            Ok(summary) => (Outcome::Answered, summary),
            Err(e) => {
                error!("Summarization failed: {}", e);
                (Outcome::Failed, APOLOGY.to_string())
            }
        };

        AgentResponse {
            outcome,
            answer,
            follow_up_questions: follow_ups_for(query.as_str()),
            sql: Some(query.into_string()),
            result: Some(result),
            assumptions,
            runtime: Duration::ZERO,
        }
    }

    fn audit_record(&self, session_id: &str, question: &str, response: &AgentResponse) -> AuditRecord {
        let error = match response.outcome {
            Outcome::Answered => None,
            Outcome::Ambiguous => Some("clarification requested".to_string()),
            Outcome::Cancelled => Some("cancelled".to_string()),
            _ => Some(response.answer.clone()),
        };

        AuditRecord {
            session_id: session_id.to_string(),
            question: question.to_string(),
            sql: response.sql.clone(),
            runtime_ms: i64::try_from(response.runtime.as_millis()).unwrap_or(i64::MAX),
            row_count: i64::try_from(response.row_count()).unwrap_or(i64::MAX),
            error,
        }
    }
}

fn exhausted(state: RetryState) -> AgentResponse {
    let errors = state.last_errors.join("; ");
    let response = if state.execution_failed {
        AgentResponse::new(
            Outcome::Exhausted,
            format!(
                "I encountered an issue while processing your query: {}. \
                 Please try rephrasing your question.",
                errors.trim_end_matches('.')
            ),
        )
        .with_follow_ups(owned(&[
            "Would you like to try a different question?",
            "Can you be more specific about what data you need?",
        ]))
    } else {
        AgentResponse::new(
            Outcome::Exhausted,
            format!("I couldn't generate a valid query: {errors}"),
        )
        .with_follow_ups(owned(&[
            "Could you rephrase your question?",
            "What specific data would you like to see?",
        ]))
    };

    AgentResponse {
        sql: state.candidate_sql,
        ..response
    }
}

/// Notes on how the generated SQL shapes the answer.
pub fn assumptions_for(sql: &str) -> Vec<String> {
    let lower = sql.to_lowercase();
    let mut assumptions = Vec::new();

    if !lower.contains("limit") {
        assumptions.push("Results will be limited by system default (200 rows)".to_string());
    }
    if lower.contains("order by") && lower.contains("desc") {
        assumptions.push("Results sorted by highest values first".to_string());
    }
    if lower.contains("sum(") || lower.contains("count(") {
        assumptions.push("Data is aggregated across all matching records".to_string());
    }

    assumptions
}

/// Suggested next questions, based on the tables the SQL touched.
pub fn follow_ups_for(sql: &str) -> Vec<String> {
    let lower = sql.to_lowercase();
    let mut questions = Vec::new();

    if lower.contains("product") {
        questions.push("How does this compare by territory?");
        questions.push("What's the trend over the last few months?");
    }
    if lower.contains("territory") {
        questions.push("Which products perform best in each territory?");
        questions.push("Show me the top HCPs by territory");
    }
    if lower.contains("hcp") {
        questions.push("What products do they prescribe most?");
        questions.push("How does this compare to other HCPs?");
    }
    if questions.is_empty() {
        questions.push("What are the top products by revenue?");
        questions.push("Show me revenue by territory");
    }

    questions.truncate(MAX_FOLLOW_UPS);
    owned(&questions)
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
