//! Response parsing for LLM outputs.
//!
//! Extracts candidate SQL from responses that may wrap it in markdown code
//! blocks. The result is untrusted and still goes through the guardrail.

/// Longest info string accepted after an opening fence.
const MAX_FENCE_INFO_LEN: usize = 20;

/// Extracts the candidate SQL from an LLM response.
///
/// Looks for, in order:
/// - a ```sql block (any case)
/// - any other fenced block, skipping a short info string
/// - the whole trimmed response, minus a leading `SQL:` label
pub fn extract_sql(response: &str) -> String {
    let response = response.trim();

    if let Some(sql) = extract_sql_block(response) {
        return sql;
    }

    if let Some(sql) = extract_generic_block(response) {
        return sql;
    }

    match response.get(..4) {
        Some(label) if label.eq_ignore_ascii_case("sql:") => response[4..].trim().to_string(),
        _ => response.to_string(),
    }
}

/// Content of the first ```sql block, matched case-insensitively.
fn extract_sql_block(text: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let start = text.to_ascii_lowercase().find("```sql")? + "```sql".len();
    let end = text[start..].find("```")?;
    let sql = text[start..start + end].trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Content of the first fenced block of any language.
fn extract_generic_block(text: &str) -> Option<String> {
    let mut start = text.find("```")? + 3;

    if let Some(newline) = text[start..].find('\n') {
        if newline < MAX_FENCE_INFO_LEN {
            start += newline + 1;
        }
    }

    let end = text[start..].find("```")?;
    let sql = text[start..start + end].trim();
    (!sql.is_empty()).then(|| sql.to_string())
}
