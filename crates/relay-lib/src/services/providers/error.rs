// Provider Error Types

use thiserror::Error;

/// Remote provider error
///
/// Display strings are what the health classifier sees, so they keep the
/// HTTP status and the provider's own message.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// 2xx with no usable text
    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Missing API key: {0} is not set")]
    MissingApiKey(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorCode {
    Http,
    Network,
    Timeout,
    EmptyResponse,
    Parse,
    MissingApiKey,
}

impl ProviderErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorCode::Http => "PROVIDER_HTTP_ERROR",
            ProviderErrorCode::Network => "PROVIDER_NETWORK_ERROR",
            ProviderErrorCode::Timeout => "PROVIDER_TIMEOUT",
            ProviderErrorCode::EmptyResponse => "PROVIDER_EMPTY_RESPONSE",
            ProviderErrorCode::Parse => "PROVIDER_PARSE_ERROR",
            ProviderErrorCode::MissingApiKey => "PROVIDER_MISSING_API_KEY",
        }
    }
}

impl ProviderError {
    pub fn code(&self) -> ProviderErrorCode {
        match self {
            ProviderError::Http { .. } => ProviderErrorCode::Http,
            ProviderError::Network(_) => ProviderErrorCode::Network,
            ProviderError::Timeout => ProviderErrorCode::Timeout,
            ProviderError::EmptyResponse => ProviderErrorCode::EmptyResponse,
            ProviderError::Parse(_) => ProviderErrorCode::Parse,
            ProviderError::MissingApiKey(_) => ProviderErrorCode::MissingApiKey,
        }
    }
}
