//! Question answering on top of the guardrail.
//!
//! [`Analyst`] drives one question through intent screening, SQL
//! generation, validation, execution and summarization.

pub mod generator;
pub mod workflow;

pub use generator::{LlmSqlGenerator, SqlGenerator};
pub use workflow::{AgentResponse, Analyst, Outcome, RetryState};
