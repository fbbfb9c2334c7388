// OpenAI-compatible Provider Implementation
//
// Gemini, Groq, OpenRouter and Ollama all expose an OpenAI-style
// `/chat/completions` endpoint, so one client covers the four of them.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChatProvider, ProviderError, ProviderResult};
use crate::config::ProviderEndpoint;
use crate::models::provider::ProviderId;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Longest slice of an error body kept in `ProviderError::Http`
const MAX_ERROR_BODY_CHARS: usize = 500;

pub struct OpenAiCompatibleProvider {
    id: ProviderId,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    /// Variable the key is expected in; `None` for keyless providers
    key_env: Option<String>,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: ProviderId, endpoint: &ProviderEndpoint, api_key: Option<String>) -> Self {
        let timeout = Duration::from_secs(endpoint.timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("[Providers] Falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            id,
            endpoint: endpoint
                .endpoint
                .clone()
                .unwrap_or_else(|| id.default_endpoint().to_string()),
            model: endpoint
                .model
                .clone()
                .unwrap_or_else(|| id.default_model().to_string()),
            api_key,
            key_env: endpoint
                .api_key_env
                .clone()
                .or_else(|| id.default_api_key_env().map(str::to_string)),
            client,
        }
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        format!("{}{}", base, path)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref key) = self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Pull the provider's message out of an error body, falling back to the raw text
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => env.error.message,
        Err(_) => body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

/// First non-blank completion text
fn extract_content(response: ChatResponse) -> ProviderResult<String> {
    response
        .choices
        .into_iter()
        .filter_map(|c| c.message.and_then(|m| m.content))
        .find(|text| !text.trim().is_empty())
        .ok_or(ProviderError::EmptyResponse)
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn complete(&self, prompt: &str) -> ProviderResult<String> {
        if self.api_key.is_none() {
            if let Some(ref var) = self.key_env {
                return Err(ProviderError::MissingApiKey(var.clone()));
            }
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let response = self
            .client
            .post(self.api_url("/chat/completions"))
            .headers(self.headers())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        extract_content(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_provider_id() {
        let provider = OpenAiCompatibleProvider::new(ProviderId::Groq, &ProviderEndpoint::default(), None);
        assert_eq!(
            provider.api_url("/chat/completions"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(provider.model, "llama-3.3-70b-versatile");
        assert!(provider.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_custom_endpoint_and_key() {
        let endpoint = ProviderEndpoint {
            endpoint: Some("http://localhost:8080/v1/".to_string()),
            model: Some("local-model".to_string()),
            ..Default::default()
        };
        let provider = OpenAiCompatibleProvider::new(ProviderId::Ollama, &endpoint, Some("k".to_string()));
        assert_eq!(provider.api_url("/chat/completions"), "http://localhost:8080/v1/chat/completions");
        assert_eq!(
            provider.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer k")
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let provider = OpenAiCompatibleProvider::new(ProviderId::Groq, &ProviderEndpoint::default(), None);
        match provider.complete("hi").await {
            Err(ProviderError::MissingApiKey(var)) => assert_eq!(var, "GROQ_API_KEY"),
            other => panic!("unexpected result {:?}", other),
        }

        let endpoint = ProviderEndpoint {
            api_key_env: Some("MY_GEMINI_KEY".to_string()),
            ..Default::default()
        };
        let provider = OpenAiCompatibleProvider::new(ProviderId::Gemini, &endpoint, None);
        assert!(matches!(
            provider.complete("hi").await,
            Err(ProviderError::MissingApiKey(ref var)) if var == "MY_GEMINI_KEY"
        ));
    }

    #[test]
    fn test_error_message_parsing() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Rate limit reached","type":"tokens"}}"#),
            "Rate limit reached"
        );
        assert_eq!(error_message("upstream down"), "upstream down");
    }

    #[test]
    fn test_extract_content() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"hi there"}}]}"#).unwrap();
        assert_eq!(extract_content(response).unwrap(), "hi there");

        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"   "}}]}"#).unwrap();
        assert!(matches!(extract_content(response), Err(ProviderError::EmptyResponse)));

        let response: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_content(response), Err(ProviderError::EmptyResponse)));
    }
}
