use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{check_status, IntegrationError};
use crate::config::AppConfig;

pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const TEMPERATURE: f32 = 0.7;
pub const MAX_TOKENS: u32 = 2000;
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

const SERVICE: &str = "DeepSeek";

pub type LlmFuture<'a> = Pin<Box<dyn Future<Output = Result<String, IntegrationError>> + Send + 'a>>;

/// Chat-completion backend abstraction (allows mocking).
pub trait LlmClient: Send + Sync {
    fn complete<'a>(&'a self, system: &'a str, prompt: &'a str) -> LlmFuture<'a>;
}

/// Client for DeepSeek's OpenAI-compatible chat completions endpoint.
pub struct DeepSeekClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl DeepSeekClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, IntegrationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| IntegrationError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            client,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, IntegrationError> {
        match config.deepseek_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Self::new(&config.deepseek_base_url, key).map(Some),
            None => Ok(None),
        }
    }

    async fn chat(&self, system: &str, prompt: &str) -> Result<String, IntegrationError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(e, REQUEST_TIMEOUT_SECS))?;

        let parsed: ChatResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::ResponseParsing(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| IntegrationError::ResponseParsing("no choices in response".into()))
    }
}

impl LlmClient for DeepSeekClient {
    fn complete<'a>(&'a self, system: &'a str, prompt: &'a str) -> LlmFuture<'a> {
        Box::pin(self.chat(system, prompt))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

/// Mock LLM client for testing: returns a configured response or error.
#[cfg(test)]
pub struct MockLlmClient {
    response: Result<String, fn() -> IntegrationError>,
    prompts: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: Ok(response.to_string()),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: fn() -> IntegrationError) -> Self {
        Self {
            response: Err(error),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl LlmClient for MockLlmClient {
    fn complete<'a>(&'a self, _system: &'a str, prompt: &'a str) -> LlmFuture<'a> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let result = match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(make) => Err(make()),
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_returns_configured_response() {
        let client = MockLlmClient::new("report body");
        assert_eq!(client.complete("sys", "prompt").await.unwrap(), "report body");
        assert_eq!(client.prompts(), vec!["prompt".to_string()]);
    }

    #[tokio::test]
    async fn mock_client_can_fail() {
        let client = MockLlmClient::failing(|| IntegrationError::Timeout(60));
        assert!(matches!(
            client.complete("sys", "prompt").await,
            Err(IntegrationError::Timeout(60))
        ));
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = DeepSeekClient::new("https://api.deepseek.com/", "sk").unwrap();
        assert_eq!(client.base_url, "https://api.deepseek.com");
        assert_eq!(client.model, DEFAULT_MODEL);
    }

    #[test]
    fn missing_key_means_no_client() {
        let config = AppConfig::default();
        assert!(DeepSeekClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn request_body_matches_chat_completions_shape() {
        let body = ChatRequest {
            model: DEFAULT_MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "deepseek-chat");
        assert_eq!(json["max_tokens"], 2000);
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
