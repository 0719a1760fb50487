//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pharma_analyst::logging::default_log_path;

/// Ask questions about pharmaceutical sales data in plain language.
#[derive(Parser, Debug)]
#[command(name = "pharma-analyst")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Use named connection from config
    #[arg(short = 'c', long, global = true, value_name = "NAME")]
    pub connection: Option<String>,

    /// Use the built-in mock database instead of PostgreSQL
    #[arg(long, global = true)]
    pub mock_db: bool,

    /// LLM provider to use (openai or mock); overrides config
    #[arg(long, global = true, value_name = "PROVIDER")]
    pub llm: Option<String>,

    /// Write logs to a file (default location when no path is given)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Answer a question about the sales data
    Ask {
        /// The question, in plain language
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run SQL through the guardrail without executing it
    Check {
        /// SQL text to validate
        sql: String,
    },
    /// Print the queryable tables, columns and relationships
    Schema,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the log file to write to, if file logging was requested.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_ref()
            .map(|path| path.clone().unwrap_or_else(default_log_path))
    }
}

impl Command {
    /// Joins the words of an `ask` question.
    pub fn question(&self) -> Option<String> {
        match self {
            Self::Ask { question, .. } => Some(question.join(" ")),
            _ => None,
        }
    }
}
