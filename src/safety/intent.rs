//! Pre-generation checks on the user's question.
//!
//! These are plain substring matches over the normalized question. They
//! over-refuse on purpose, and every refusal carries a specific reason.

/// Phrases that ask for the whole dataset.
const DUMP_PATTERNS: &[&str] = &[
    "dump everything",
    "dump all",
    "export all",
    "give me everything",
    "all the data",
    "entire database",
    "all records",
    "all rows",
    "download everything",
    "extract all",
];

const DUMP_REFUSAL: &str = "I can't export entire datasets. Please ask a specific question about \
     the data, such as 'What are the top 10 products by revenue?' or 'Show sales by territory'.";

/// Sensitive topics and the reason given when one is mentioned.
const SENSITIVE_PATTERNS: &[(&str, &str)] = &[
    ("password", "I cannot provide password information."),
    ("credential", "I cannot provide credential information."),
    ("api key", "I cannot provide API key information."),
    ("secret", "I cannot provide secret information."),
    ("audit_log", "Access to audit logs is restricted."),
];

const VAGUE_WORDS: &[&str] = &["help", "something", "anything", "whatever", "stuff"];

/// Outcome of screening a question before any SQL is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentDecision {
    /// Safe to generate SQL for.
    Continue,
    /// Refused, with the user-facing reason.
    Refuse(String),
    /// Too vague; ask these questions instead.
    Clarify(Vec<String>),
}

/// Collapses whitespace and makes sure the question ends in punctuation.
pub fn normalize_question(question: &str) -> String {
    let mut normalized = question.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.ends_with(['?', '.', '!']) {
        normalized.push('?');
    }
    normalized
}

/// Refuses requests for bulk exports of the data.
pub fn check_dump_request(question: &str) -> Option<&'static str> {
    let lower = question.to_lowercase();
    DUMP_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
        .then_some(DUMP_REFUSAL)
}

/// Refuses questions that probe for credentials or the audit trail.
pub fn check_sensitive_request(question: &str) -> Option<&'static str> {
    let lower = question.to_lowercase();
    SENSITIVE_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, reason)| *reason)
}

/// Returns clarifying questions when the question is too short or vague.
pub fn check_ambiguity(question: &str) -> Option<Vec<String>> {
    let word_count = question.split_whitespace().count();
    if word_count < 3 {
        return Some(owned(&[
            "Could you provide more details about what you'd like to know?",
            "What specific metrics or data are you interested in?",
            "Are you looking for data about products, territories, or sales?",
        ]));
    }

    let lower = question.to_lowercase();
    if word_count < 6 && VAGUE_WORDS.iter().any(|word| lower.contains(word)) {
        return Some(owned(&[
            "What specific information would you like to see?",
            "Would you like to see top products by revenue?",
            "Are you interested in sales data by territory?",
        ]));
    }

    None
}

/// Runs every check in order: dump, sensitive, ambiguity.
pub fn screen_question(normalized: &str) -> IntentDecision {
    if let Some(reason) = check_dump_request(normalized) {
        return IntentDecision::Refuse(reason.to_string());
    }
    if let Some(reason) = check_sensitive_request(normalized) {
        return IntentDecision::Refuse(reason.to_string());
    }
    if let Some(questions) = check_ambiguity(normalized) {
        return IntentDecision::Clarify(questions);
    }
    IntentDecision::Continue
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
