//! Integration tests for Pharma Analyst.

pub mod config_test;
pub mod execution_test;
pub mod policy_test;
pub mod workflow_test;
