//! Prompt construction for LLM requests.
//!
//! Builds the generation, repair and summarization message lists. The
//! schema text comes from the allowlist, so prompts never mention tables
//! the guardrail would reject.

use crate::llm::types::Message;

/// System prompt for first-pass SQL generation.
const GENERATION_PROMPT_TEMPLATE: &str = r#"You are an expert SQL analyst for a pharmaceutical company. Generate precise SQL queries based on user questions.

SCHEMA:
{schema}

RULES:
1. Generate ONLY SELECT statements. Never use INSERT, UPDATE, DELETE, DROP, or any DDL/DML.
2. Do NOT use SELECT *. Always explicitly list the columns needed.
3. Only reference tables and columns that exist in the schema above.
4. Use PostgreSQL dialect.
5. Apply case-insensitive filtering for text: use LOWER(column) LIKE LOWER('%value%')
6. Include appropriate JOINs when data from multiple tables is needed.
7. Use meaningful column aliases for clarity.
8. Order results logically (e.g., by revenue DESC for top products).
9. Do NOT add LIMIT unless specifically asked - the system will apply limits.
10. For aggregations, always include GROUP BY.

OUTPUT:
Return ONLY the SQL query. No explanations, no markdown formatting, just the raw SQL.

Example good output:
SELECT p.name AS product_name, SUM(s.revenue) AS total_revenue
FROM product p
JOIN sales s ON p.id = s.product_id
GROUP BY p.id, p.name
ORDER BY total_revenue DESC"#;

/// System prompt for repairing a rejected or failed query.
const FIX_PROMPT_TEMPLATE: &str = r#"You are an expert SQL debugger. Fix the SQL query based on the error provided.

SCHEMA:
{schema}

RULES:
1. Fix ONLY the issue indicated by the error.
2. Maintain the original query intent.
3. Do NOT use SELECT *.
4. Only use tables/columns from the schema.
5. Return ONLY the fixed SQL query, no explanations.

OUTPUT:
Return ONLY the corrected SQL query. No markdown, no explanations."#;

/// System prompt for summarizing results.
const SUMMARY_PROMPT: &str = r#"You are a business analyst presenting data insights to executives.
Summarize the query results in a clear, business-friendly way.

GUIDELINES:
1. Lead with the key insight or answer to the user's question.
2. Reference specific numbers from the data - never make up numbers.
3. Keep it concise (2-4 sentences for simple queries, up to a short paragraph for complex ones).
4. Use business language, not technical SQL jargon.
5. If results are empty, explain that clearly and suggest possible reasons.
6. Mention any notable patterns or outliers in the data.
7. Do NOT hallucinate or invent data not present in the results.

FORMAT:
Write in natural language. No bullet points unless listing multiple items.
For monetary values, use dollar signs and comma formatting (e.g., $1,234.56)."#;

/// Everything the summarizer is told about an executed query.
#[derive(Debug, Clone, Copy)]
pub struct SummaryContext<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub columns: &'a [&'a str],
    /// Result rows as pretty-printed JSON.
    pub rows_json: &'a str,
    pub assumptions: &'a [String],
    pub schema_summary: &'a str,
}

/// Messages for generating SQL from a question.
pub fn generation_messages(schema: &str, question: &str) -> Vec<Message> {
    vec![
        Message::system(GENERATION_PROMPT_TEMPLATE.replace("{schema}", schema)),
        Message::user(question),
    ]
}

/// Messages for repairing SQL given the error it produced.
pub fn fix_messages(schema: &str, question: &str, sql: &str, error: &str) -> Vec<Message> {
    vec![
        Message::system(FIX_PROMPT_TEMPLATE.replace("{schema}", schema)),
        Message::user(format!(
            "User Question: {question}\n\nOriginal SQL:\n{sql}\n\nError:\n{error}\n\nPlease fix the SQL query."
        )),
    ]
}

/// Messages for summarizing query results.
pub fn summary_messages(context: &SummaryContext<'_>) -> Vec<Message> {
    let assumptions = if context.assumptions.is_empty() {
        "None".to_string()
    } else {
        context.assumptions.join(", ")
    };

    vec![
        Message::system(SUMMARY_PROMPT),
        Message::user(format!(
            "User Question: {}\n\n\
             SQL Executed:\n{}\n\n\
             Result Columns: {}\n\n\
             Result Data (up to 50 rows):\n{}\n\n\
             Assumptions Made: {}\n\n\
             Schema Context: {}\n\n\
             Please provide a concise, business-friendly summary of these results.\n\
             Only reference numbers that appear in the data. Do not hallucinate.",
            context.question,
            context.sql,
            context.columns.join(", "),
            context.rows_json,
            assumptions,
            context.schema_summary,
        )),
    ]
}
