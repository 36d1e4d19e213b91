//! Text sentiment adapter
//!
//! Sends text to a hosted chat model over the OpenAI-compatible
//! chat-completions API (OpenRouter by default) and asks for a JSON
//! sentiment/emotion breakdown. The reply is parsed as-is: no schema
//! validation, no repair, no retries.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::TextModelConfig;

// ============================================================================
// Analyzer trait
// ============================================================================

/// Abstraction over remote text-sentiment providers.
#[async_trait]
pub trait TextSentimentAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<ModelReply, SentimentError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// What the model said, parsed or not.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// The reply content was a JSON object.
    Structured(Map<String, Value>),
    /// The reply content was not a JSON object; `reason` says why.
    Unstructured { raw: String, reason: String },
}

impl ModelReply {
    /// Parse reply content without attempting any repair.
    pub fn parse(content: &str) -> Self {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(map)) => ModelReply::Structured(map),
            Ok(other) => ModelReply::Unstructured {
                raw: content.to_string(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            },
            Err(e) => ModelReply::Unstructured {
                raw: content.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum SentimentError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Model reply had no message content")]
    EmptyReply,

    #[error("Missing API key")]
    MissingApiKey,
}

// ============================================================================
// Chat-completions wire types (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: Option<Value>,
    message: String,
}

/// Build the single-turn instruction sent to the model.
pub fn build_prompt(text: &str) -> String {
    format!(
        "Analyze sentiment and emotion of this text: '{}'. Return JSON with sentiment and emotion.",
        text
    )
}

// ============================================================================
// OpenRouterClient
// ============================================================================

/// Resolved client settings.
#[derive(Debug, Clone)]
pub struct TextModelSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl TextModelSettings {
    pub fn new(api_key: String, config: &TextModelConfig) -> Self {
        Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Chat-completions client for OpenRouter (or any compatible endpoint).
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    settings: TextModelSettings,
}

impl OpenRouterClient {
    pub fn new(settings: TextModelSettings) -> Result<Self, SentimentError> {
        if settings.api_key.is_empty() {
            return Err(SentimentError::MissingApiKey);
        }

        // No timeout override: the library default applies.
        let client = Client::builder().build()?;

        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Send one chat request and return the raw reply content.
    pub async fn complete(&self, prompt: String) -> Result<String, SentimentError> {
        let url = format!("{}/chat/completions", self.settings.base_url);

        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![ContentPart {
                    kind: "text",
                    text: prompt,
                }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| match e.code {
                    Some(code) => format!("{} (code {})", e.message, code),
                    None => e.message,
                })
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Chat completion API error");

            return Err(SentimentError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response.json().await?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(SentimentError::EmptyReply)
    }
}

#[async_trait]
impl TextSentimentAnalyzer for OpenRouterClient {
    async fn analyze(&self, text: &str) -> Result<ModelReply, SentimentError> {
        let content = self.complete(build_prompt(text)).await?;
        let reply = ModelReply::parse(&content);

        if let ModelReply::Unstructured { reason, .. } = &reply {
            tracing::warn!(model = %self.settings.model, reason = %reason, "Model reply was not a JSON object");
        } else {
            tracing::debug!(model = %self.settings.model, "Model reply parsed");
        }

        Ok(reply)
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_object_is_structured() {
        let reply = ModelReply::parse(r#"{"sentiment":{"label":"positive"},"emotion":{"joy":0.9}}"#);
        match reply {
            ModelReply::Structured(map) => {
                assert_eq!(map["sentiment"], json!({"label": "positive"}));
                assert_eq!(map["emotion"], json!({"joy": 0.9}));
            }
            other => panic!("Expected Structured, got: {other:?}"),
        }
    }

    #[test]
    fn test_parse_prose_is_unstructured() {
        let reply = ModelReply::parse("The text is positive.");
        match reply {
            ModelReply::Unstructured { raw, reason } => {
                assert_eq!(raw, "The text is positive.");
                assert!(!reason.is_empty());
            }
            other => panic!("Expected Unstructured, got: {other:?}"),
        }
    }

    #[test]
    fn test_parse_fenced_json_is_not_repaired() {
        let reply = ModelReply::parse("```json\n{\"sentiment\":\"positive\"}\n```");
        assert!(matches!(reply, ModelReply::Unstructured { .. }));
    }

    #[test]
    fn test_parse_array_is_unstructured() {
        match ModelReply::parse("[1, 2]") {
            ModelReply::Unstructured { reason, .. } => assert!(reason.contains("an array")),
            other => panic!("Expected Unstructured, got: {other:?}"),
        }
    }

    #[test]
    fn test_prompt_quotes_text() {
        assert_eq!(
            build_prompt("I love this!"),
            "Analyze sentiment and emotion of this text: 'I love this!'. Return JSON with sentiment and emotion."
        );
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let settings = TextModelSettings {
            api_key: String::new(),
            model: "openai/gpt-5".to_string(),
            base_url: "http://localhost".to_string(),
        };
        assert!(matches!(
            OpenRouterClient::new(settings),
            Err(SentimentError::MissingApiKey)
        ));
    }

    #[test]
    fn test_settings_trim_trailing_slash() {
        let config = TextModelConfig {
            base_url: "https://openrouter.ai/api/v1/".to_string(),
            ..Default::default()
        };
        let settings = TextModelSettings::new("k".to_string(), &config);
        assert_eq!(settings.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(settings.model, "openai/gpt-5");
    }
}
