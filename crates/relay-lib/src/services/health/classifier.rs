// Provider Error Classification
//
// Maps raw provider error text to an ErrorClass. Pattern families are checked
// in a fixed order, first match wins: auth, billing, rate limit, context
// overflow, empty response, timeout, transient. The order matters because one
// message can match several families.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::provider::{ErrorClass, ProviderId};

/// Ordered (class, pattern) pairs
const ERROR_PATTERNS: &[(ErrorClass, &str)] = &[
    (
        ErrorClass::AuthError,
        r"(?i)\b(401|403)\b|unauthori[sz]ed|forbidden|invalid[ _-]?(api[ _-]?)?key|missing api key|api key not valid|incorrect api key|authentication|permission[ _]denied",
    ),
    (
        ErrorClass::Billing,
        r"(?i)\b402\b|billing|payment required|insufficient[ _](credits?|funds|balance|quota)|credit balance|out of credits",
    ),
    (
        ErrorClass::RateLimit,
        r"(?i)\b429\b|rate[ _-]?limit|too many requests|resource[ _]exhausted|quota",
    ),
    (
        ErrorClass::ContextOverflow,
        r"(?i)\b413\b|context[ _](length|window)|maximum context|too many tokens|token limit|prompt is too long|request too large|input too long",
    ),
    (
        ErrorClass::EmptyResponse,
        r"(?i)empty (response|completion|reply|output)|no content|returned nothing|no output",
    ),
    (
        ErrorClass::Timeout,
        r"(?i)timed? ?out|timeout|etimedout|deadline exceeded|\b(408|504)\b",
    ),
    (
        ErrorClass::Transient,
        r"(?i)\b(500|502|503|529)\b|bad gateway|service unavailable|internal server error|overloaded|econnreset|econnrefused|eai_again|socket hang up|connection (reset|refused|closed)|network|fetch failed",
    ),
];

static COMPILED_PATTERNS: LazyLock<Vec<(ErrorClass, Regex)>> = LazyLock::new(|| {
    ERROR_PATTERNS
        .iter()
        .filter_map(|(class, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*class, re)),
            Err(e) => {
                log::error!("[Classifier] Invalid pattern for {}: {}", class, e);
                None
            }
        })
        .collect()
});

/// Classify provider error text. Never fails; unmatched text is `Unknown`.
pub fn classify(error_text: &str) -> ErrorClass {
    COMPILED_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(error_text))
        .map(|(class, _)| *class)
        .unwrap_or(ErrorClass::Unknown)
}

/// Classify any error through its display text
pub fn classify_error(error: &dyn std::error::Error) -> ErrorClass {
    classify(&error.to_string())
}

/// Whether a failure of `class` is likely caused by the caller's request
pub fn should_penalize_caller(class: ErrorClass) -> bool {
    class.penalizes_caller()
}

/// Guess which provider an error came from by hostname or name
pub fn infer_provider(error_text: &str) -> Option<ProviderId> {
    let lower = error_text.to_lowercase();
    ProviderId::all()
        .into_iter()
        .find(|p| p.markers().iter().any(|m| lower.contains(m)))
}
