use crate::error::ReadinessError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1500;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Opaque prompt -> text function. Fallible and non-deterministic.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ReadinessError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: Option<&str>, model: &str, endpoint: &str) -> Result<Self, ReadinessError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ReadinessError::Configuration("OPENAI_API_KEY is not configured".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ReadinessError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ReadinessError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        log::debug!(
            "chat completion request: model={} prompt_chars={}",
            self.model,
            request.system.len() + request.user.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::error!("chat completion failed with status {status}");
            return Err(ReadinessError::Upstream(format!("provider returned {status}: {error_text}")));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ReadinessError::Upstream("No content returned from provider".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "system".to_string(),
            user: "user".to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    #[test]
    fn missing_credential_is_a_configuration_error() {
        let err = OpenAiClient::new(None, DEFAULT_MODEL, DEFAULT_ENDPOINT).expect_err("no key");
        assert!(matches!(err, ReadinessError::Configuration(_)));

        let err = OpenAiClient::new(Some("  "), DEFAULT_MODEL, DEFAULT_ENDPOINT).expect_err("blank key");
        assert!(matches!(err, ReadinessError::Configuration(_)));
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 1500
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"purpose\":\"x\"}"}}]}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("test-key"), DEFAULT_MODEL, &server.url()).expect("client");
        let content = client.complete(&request()).await.expect("completion");

        assert_eq!(content, r#"{"purpose":"x"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn provider_errors_surface_as_upstream() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("test-key"), DEFAULT_MODEL, &server.url()).expect("client");
        let err = client.complete(&request()).await.expect_err("503");

        assert!(matches!(err, ReadinessError::Upstream(ref msg) if msg.contains("overloaded")));
    }

    #[tokio::test]
    async fn empty_content_is_an_upstream_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("test-key"), DEFAULT_MODEL, &server.url()).expect("client");
        let err = client.complete(&request()).await.expect_err("no choices");
        assert!(matches!(err, ReadinessError::Upstream(_)));
    }
}
