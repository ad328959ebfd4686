//! Wire types for OpenAI-compatible chat and embedding endpoints
//!
//! Only the fields the graph actually reads are modelled; serde ignores the rest.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One part of a multimodal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Message body: plain text, or a list of parts for vision requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Text of the message, with image parts dropped
    pub fn as_text(&self) -> String {
        let parts = match self {
            MessageContent::Text(text) => return text.clone(),
            MessageContent::Parts(parts) => parts,
        };
        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect();
        texts.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl Message {
    fn plain(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, text)
    }

    /// Image first, then the prompt about it
    pub fn user_with_image(image_url: impl Into<String>, prompt: impl Into<String>) -> Self {
        let image = ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image_url.into(),
            },
        };
        let prompt = ContentPart::Text {
            text: prompt.into(),
        };
        Self {
            role: MessageRole::User,
            content: MessageContent::Parts(vec![image, prompt]),
        }
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// Body of `POST chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(self, temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..self
        }
    }

    pub fn with_max_tokens(self, max_tokens: usize) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..self
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// First choice of a completion, flattened
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u32,
}

impl LlmResponse {
    /// `None` when the provider sent no choice or an empty one
    pub fn from_chat_response(response: ChatResponse) -> Option<Self> {
        let ChatResponse {
            model,
            choices,
            usage,
        } = response;
        let content = choices.into_iter().next()?.message.content?;
        Some(Self {
            content,
            model,
            tokens_used: usage.unwrap_or_default().total_tokens,
        })
    }
}

/// Body of `POST embeddings`, one input per call
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: String,
}

impl EmbeddingRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_serializes_as_string() {
        let json = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_image_message_serializes_as_parts() {
        let message = Message::user_with_image("https://example.com/a.png", "describe");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(json["content"][0]["image_url"]["url"], "https://example.com/a.png");
        assert_eq!(json["content"][1]["type"], "text");
        assert_eq!(message.text(), "describe");
    }

    #[test]
    fn test_chat_request_skips_unset_options() {
        let request = ChatRequest::new("m", vec![Message::user("s")]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());

        let json = serde_json::to_value(request.with_temperature(0.2).with_max_tokens(10)).unwrap();
        assert_eq!(json["max_tokens"], 10);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "id": "x",
            "model": "deepseek/deepseek-v3-0324",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "FOLLOW:3"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        }"#;
        let response: ChatResponse = serde_json::from_str(body).unwrap();
        let simplified = LlmResponse::from_chat_response(response).unwrap();
        assert_eq!(simplified.content, "FOLLOW:3");
        assert_eq!(simplified.tokens_used, 12);
    }

    #[test]
    fn test_response_without_choices() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(LlmResponse::from_chat_response(response).is_none());
    }
}
