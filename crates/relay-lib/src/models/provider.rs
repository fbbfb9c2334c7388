// Remote LLM provider data models
//
// The closed set of providers the relay routes to, the failure classes the
// health tracker understands, and the cooldown policy attached to each class.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Known remote providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Gemini,
    Groq,
    OpenRouter,
    Ollama,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Groq => "groq",
            ProviderId::OpenRouter => "open_router",
            ProviderId::Ollama => "ollama",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "Gemini",
            ProviderId::Groq => "Groq",
            ProviderId::OpenRouter => "OpenRouter",
            ProviderId::Ollama => "Ollama",
        }
    }

    /// Lowercase substrings that identify this provider inside error text
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            ProviderId::Gemini => &["generativelanguage.googleapis.com", "gemini"],
            ProviderId::Groq => &["api.groq.com", "groq"],
            ProviderId::OpenRouter => &["openrouter.ai", "openrouter"],
            ProviderId::Ollama => &["localhost:11434", "127.0.0.1:11434", "ollama"],
        }
    }

    /// OpenAI-compatible base URL
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderId::Groq => "https://api.groq.com/openai/v1",
            ProviderId::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderId::Ollama => "http://127.0.0.1:11434/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini-2.0-flash",
            ProviderId::Groq => "llama-3.3-70b-versatile",
            ProviderId::OpenRouter => "meta-llama/llama-3.3-70b-instruct",
            ProviderId::Ollama => "llama3.2",
        }
    }

    /// Environment variable holding the API key, `None` for local providers
    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderId::Gemini => Some("GEMINI_API_KEY"),
            ProviderId::Groq => Some("GROQ_API_KEY"),
            ProviderId::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderId::Ollama => None,
        }
    }

    pub fn all() -> Vec<ProviderId> {
        vec![
            ProviderId::Gemini,
            ProviderId::Groq,
            ProviderId::OpenRouter,
            ProviderId::Ollama,
        ]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "gemini" => Ok(ProviderId::Gemini),
            "groq" => Ok(ProviderId::Groq),
            "open_router" | "openrouter" => Ok(ProviderId::OpenRouter),
            "ollama" => Ok(ProviderId::Ollama),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    AuthError,
    RateLimit,
    Timeout,
    EmptyResponse,
    ContextOverflow,
    Billing,
    Transient,
    Unknown,
}

/// How many failures of one class, within which window, start a cooldown of what length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub threshold: usize,
    /// `None` counts failures over the whole retained history
    pub window: Option<Duration>,
    pub cooldown: Duration,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::AuthError => "auth_error",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Timeout => "timeout",
            ErrorClass::EmptyResponse => "empty_response",
            ErrorClass::ContextOverflow => "context_overflow",
            ErrorClass::Billing => "billing",
            ErrorClass::Transient => "transient",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Cooldown policy for this class; `ContextOverflow` never cools a provider down
    pub fn policy(&self) -> Option<CooldownPolicy> {
        let (threshold, window, cooldown) = match self {
            ErrorClass::AuthError => (3, None, Duration::hours(4)),
            ErrorClass::Billing => (1, None, Duration::hours(4)),
            ErrorClass::RateLimit => (5, Some(Duration::minutes(10)), Duration::minutes(30)),
            ErrorClass::Timeout => (3, Some(Duration::minutes(15)), Duration::minutes(15)),
            ErrorClass::EmptyResponse => (5, Some(Duration::minutes(30)), Duration::minutes(10)),
            ErrorClass::Transient => (3, Some(Duration::minutes(5)), Duration::minutes(5)),
            ErrorClass::Unknown => (5, Some(Duration::minutes(10)), Duration::minutes(5)),
            ErrorClass::ContextOverflow => return None,
        };
        Some(CooldownPolicy {
            threshold,
            window,
            cooldown,
        })
    }

    /// Whether a failure of this class points at the caller's request rather than the provider
    pub fn penalizes_caller(&self) -> bool {
        match self {
            ErrorClass::AuthError
            | ErrorClass::RateLimit
            | ErrorClass::Timeout
            | ErrorClass::Billing
            | ErrorClass::Transient => false,
            ErrorClass::EmptyResponse | ErrorClass::ContextOverflow | ErrorClass::Unknown => true,
        }
    }

    pub fn all() -> Vec<ErrorClass> {
        vec![
            ErrorClass::AuthError,
            ErrorClass::RateLimit,
            ErrorClass::Timeout,
            ErrorClass::EmptyResponse,
            ErrorClass::ContextOverflow,
            ErrorClass::Billing,
            ErrorClass::Transient,
            ErrorClass::Unknown,
        ]
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic snapshot of one provider's health
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: ProviderId,
    pub healthy: bool,
    pub failure_count: usize,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub cooldown_reason: Option<String>,
    /// Most recent failure classes, oldest first
    pub recent_errors: Vec<ErrorClass>,
}
