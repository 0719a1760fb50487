//! Pharma Analyst - natural-language questions over a pharmaceutical
//! sales database, answered through a strict SQL guardrail.
//!
//! This library exposes the core modules for use in integration tests.

pub mod agent;
pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod safety;
