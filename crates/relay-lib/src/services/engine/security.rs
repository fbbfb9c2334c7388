// Engine Security Utilities
//
// - Argument validation: secrets never travel on the command line
// - Output redaction: API keys are scrubbed from stderr before logging
// - Working directory validation

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::error::{EngineError, EngineResult};

/// Forbidden patterns in engine arguments
const FORBIDDEN_ARG_PATTERNS: &[&str] = &[
    "--api-key",
    "--api_key",
    "--apikey",
    "--token",
    "--secret",
    "--password",
    "--key=",
    "-k=",
];

/// API key patterns and their replacements, most specific first
const API_KEY_PATTERNS: &[(&str, &str)] = &[
    (r"sk-ant-[a-zA-Z0-9_-]{40,}", "[REDACTED_ANTHROPIC_KEY]"),
    (r"sk-or-v1-[a-fA-F0-9]{32,}", "[REDACTED_OPENROUTER_KEY]"),
    (r"sk-proj-[a-zA-Z0-9_-]{40,}", "[REDACTED_OPENAI_KEY]"),
    (r"sk-[a-zA-Z0-9]{48,}", "[REDACTED_OPENAI_KEY]"),
    (r"gsk_[a-zA-Z0-9]{40,}", "[REDACTED_GROQ_KEY]"),
    (r"AIza[a-zA-Z0-9_-]{35}", "[REDACTED_GOOGLE_KEY]"),
    (r"(?i)api[_-]?key[:\s=]+\S{20,}", "[REDACTED_API_KEY]"),
    (r"(?i)bearer\s+[a-zA-Z0-9._-]+", "[REDACTED_BEARER_TOKEN]"),
];

static API_KEY_REGEXES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    API_KEY_PATTERNS
        .iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("Invalid API key regex"),
                *replacement,
            )
        })
        .collect()
});

/// Reject arguments that look like they carry credentials
pub fn validate_arguments(args: &[String]) -> EngineResult<()> {
    for arg in args {
        let arg_lower = arg.to_lowercase();
        if let Some(pattern) = FORBIDDEN_ARG_PATTERNS.iter().find(|p| arg_lower.contains(*p)) {
            return Err(EngineError::SecurityViolation(format!(
                "Forbidden argument pattern detected: '{}'. API keys should be passed via environment variables.",
                pattern
            )));
        }
        if might_contain_api_key(arg) {
            return Err(EngineError::SecurityViolation(
                "Argument looks like an API key. API keys should be passed via environment variables."
                    .to_string(),
            ));
        }
    }
    Ok(())
}

/// Redact API keys from engine output
pub fn sanitize_output(output: &str) -> String {
    let mut result = output.to_string();
    for (re, replacement) in API_KEY_REGEXES.iter() {
        if re.is_match(&result) {
            result = re.replace_all(&result, *replacement).into_owned();
        }
    }
    result
}

/// Sanitize a single streamed line
pub fn sanitize_line(line: &str) -> String {
    sanitize_output(line)
}

pub fn might_contain_api_key(text: &str) -> bool {
    API_KEY_REGEXES.iter().any(|(re, _)| re.is_match(text))
}

/// Working directory must exist, be a directory, and be absolute
pub fn validate_working_directory(path: &Path) -> EngineResult<()> {
    if !path.is_absolute() {
        return Err(EngineError::SecurityViolation(format!(
            "Working directory must be an absolute path: {}",
            path.display()
        )));
    }
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(EngineError::SecurityViolation(
            "Path traversal detected: '..' is not allowed".to_string(),
        ));
    }
    if !path.is_dir() {
        return Err(EngineError::SecurityViolation(format!(
            "Working directory does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}
