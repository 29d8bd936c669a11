use crate::error::{ChatServiceError, ConfigError};
use crate::models::{Role, Turn};
use crate::traits::ChatModel;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiChatConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl OpenAiChatConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingEnv("OPENAI_API_KEY"))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().trim_end_matches('/').to_string();
            }
        }
        Ok(config)
    }
}

pub struct OpenAiChat {
    client: Client,
    config: OpenAiChatConfig,
}

impl OpenAiChat {
    pub fn new(config: OpenAiChatConfig) -> Result<Self, ChatServiceError> {
        if config.api_key.is_empty() {
            return Err(ChatServiceError::NotConfigured(
                "api key must not be empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
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
    content: Option<String>,
}

fn to_messages<'a>(prompt: &'a str, history: &'a [Turn]) -> Vec<ChatMessage<'a>> {
    history
        .iter()
        .map(|turn| ChatMessage {
            role: match turn.role {
                Role::Human => "user",
                Role::Assistant => "assistant",
            },
            content: &turn.content,
        })
        .chain(std::iter::once(ChatMessage {
            role: "user",
            content: prompt,
        }))
        .collect()
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, prompt: &str, history: &[Turn]) -> Result<String, ChatServiceError> {
        debug!(model = %self.config.model, history = history.len(), "chat completion");

        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: to_messages(prompt, history),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let details = response.text().await.unwrap_or_default();
            return Err(ChatServiceError::Service { status, details });
        }

        let payload: ChatResponse = response.json().await?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ChatServiceError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_precedes_prompt_with_mapped_roles() {
        let history = vec![Turn::human("hi"), Turn::assistant("hello")];
        let messages = to_messages("next?", &history);

        assert_eq!(
            messages,
            vec![
                ChatMessage { role: "user", content: "hi" },
                ChatMessage { role: "assistant", content: "hello" },
                ChatMessage { role: "user", content: "next?" },
            ]
        );
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result = OpenAiChat::new(OpenAiChatConfig::new(""));
        assert!(matches!(result, Err(ChatServiceError::NotConfigured(_))));
    }
}
