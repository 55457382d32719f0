//! OpenAI-compatible chat completions, Groq by default.

use crate::error::{AvatarError, Result};
use crate::providers::{LanguageModel, collapse_newlines, ensure_success};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

const SERVICE: &str = "llm";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

pub struct GroqClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
}

impl GroqClient {
    /// # Errors
    ///
    /// Returns `ConfigInvalidValue` if the API key is empty.
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(AvatarError::ConfigInvalidValue {
                key: "llm.api_key".to_string(),
                message: "chat completions API key required".to_string(),
            });
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl LanguageModel for GroqClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "Requesting completion");

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AvatarError::transport(SERVICE, e.to_string()))?;
        let body = ensure_success(SERVICE, response)
            .await?
            .text()
            .await
            .map_err(|e| AvatarError::transport(SERVICE, e.to_string()))?;

        let reply = parse_reply(&body)?;
        tracing::info!(reply = %reply, "Completion received");
        Ok(reply)
    }
}

/// Extracts `choices[0].message.content` with line breaks collapsed.
pub fn parse_reply(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| AvatarError::transport(SERVICE, format!("unexpected response: {e}")))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| AvatarError::transport(SERVICE, "response contained no choices"))?;

    Ok(collapse_newlines(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice() {
        let body = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "That sounds lovely."}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 12}
        }"#;

        assert_eq!(parse_reply(body).unwrap(), "That sounds lovely.");
    }

    #[test]
    fn collapses_newlines_in_reply() {
        let body = r#"{"choices": [{"message": {"content": "Great!\nTell me more.\\nWhat else?"}}]}"#;

        assert_eq!(
            parse_reply(body).unwrap(),
            "Great! Tell me more. What else?"
        );
    }

    #[test]
    fn no_choices_is_transport_error() {
        assert!(matches!(
            parse_reply(r#"{"choices": []}"#),
            Err(AvatarError::Transport { service: "llm", .. })
        ));
    }

    #[test]
    fn error_object_is_transport_error() {
        let body = r#"{"error": {"message": "Rate limit reached", "type": "tokens"}}"#;
        assert!(matches!(
            parse_reply(body),
            Err(AvatarError::Transport { .. })
        ));
    }

    #[test]
    fn request_serializes_single_user_message() {
        let request = ChatRequest {
            model: DEFAULT_MODEL,
            messages: [ChatMessage {
                role: "user",
                content: "hello \"there\"",
            }],
        };

        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "llama3-8b-8192");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello \"there\"");
    }
}
