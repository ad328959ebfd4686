//! Ports to the external collaborators of the graph engine
//!
//! Model providers, content backends and the follow-up scheduler are
//! reached only through these traits, so tests can substitute fakes.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::llm::types::Message;

use super::block::{BlockId, Storage};

/// Embedding port: text to a fixed-dimension vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Chat port: one completion over a full message list
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<String>;
}

/// Content-understanding port for images
#[async_trait]
pub trait ContentUnderstanding: Send + Sync {
    async fn analyze(&self, image: &ImageSource) -> Result<ImageAnalysis>;
}

/// Content-resolution port: dereference a storage reference
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(&self, storage: &Storage, content: &str) -> Result<Vec<u8>>;

    /// Resolve and decode as UTF-8 text
    async fn resolve_text(&self, storage: &Storage, content: &str) -> Result<String> {
        let bytes = self.resolve(storage, content).await?;
        String::from_utf8(bytes).map_err(|_| {
            Error::InvalidInput(format!(
                "content '{}' from storage '{}' is not UTF-8 text",
                content, storage.name
            ))
        })
    }
}

/// Work to run for a block after its creating batch committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpTask {
    Organize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub block_id: BlockId,
    pub task: FollowUpTask,
}

impl FollowUp {
    pub fn organize(block_id: BlockId) -> Self {
        Self {
            block_id,
            task: FollowUpTask::Organize,
        }
    }
}

/// Scheduler port for follow-up work
pub trait FollowUpScheduler: Send + Sync {
    fn schedule(&self, follow_up: FollowUp) -> Result<()>;
}

/// Where an image can be read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    /// Base64 payload with its mime type
    Inline { mime: String, data: String },
}

impl ImageSource {
    /// Interpret inline block content
    ///
    /// Accepts a `data:` URL, a bare base64 payload, or raw content that is
    /// encoded as-is.
    pub fn from_inline(content: &str) -> Result<Self> {
        let trimmed = content.trim();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| Error::ExtractionFailed("malformed data URL".to_string()))?;
            let mime = header.trim_end_matches(";base64").to_string();
            return Ok(ImageSource::Inline {
                mime,
                data: data.to_string(),
            });
        }

        match STANDARD.decode(trimmed) {
            Ok(bytes) if !bytes.is_empty() => Ok(ImageSource::Inline {
                mime: sniff_image_mime(&bytes).to_string(),
                data: trimmed.to_string(),
            }),
            _ => Ok(Self::from_bytes(content.as_bytes())),
        }
    }

    /// Encode raw image bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        ImageSource::Inline {
            mime: sniff_image_mime(bytes).to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    /// URL usable in an `image_url` message part
    pub fn to_url(&self) -> String {
        match self {
            ImageSource::Url(url) => url.clone(),
            ImageSource::Inline { mime, data } => format!("data:{};base64,{}", mime, data),
        }
    }
}

fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Structured reading of an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub summary: String,
    #[serde(default)]
    pub details: Vec<ImageDetail>,
}

/// One key piece of information found in an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDetail {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub actions: Vec<String>,
}
