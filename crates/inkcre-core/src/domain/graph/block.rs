//! Block: the atomic content unit of the graph

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Store-assigned block identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub i64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlockId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(BlockId)
            .map_err(|_| Error::InvalidInput(format!("'{}' is not a block id", s)))
    }
}

impl From<BlockId> for i64 {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

/// Tag selecting the resolver that can decompose a block
///
/// Open for extension: any string is a valid kind, the registry decides
/// whether it can be organized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolverKind(Cow<'static, str>);

impl ResolverKind {
    pub const TEXT: ResolverKind = ResolverKind(Cow::Borrowed("text"));
    pub const IMAGE: ResolverKind = ResolverKind(Cow::Borrowed("image"));
    pub const JSON: ResolverKind = ResolverKind(Cow::Borrowed("json"));

    pub fn new(kind: impl Into<String>) -> Self {
        Self(Cow::Owned(kind.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResolverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidInput("block kind cannot be empty".to_string()));
        }
        Ok(match s {
            "text" => Self::TEXT,
            "image" => Self::IMAGE,
            "json" => Self::JSON,
            other => Self::new(other.to_lowercase()),
        })
    }
}

/// A persisted block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub kind: ResolverKind,
    /// Literal text, or a reference into `storage` when one is set
    pub content: String,
    pub storage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Block {
    /// Content is the payload itself rather than a storage reference
    pub fn is_literal(&self) -> bool {
        self.storage.is_none()
    }
}

/// A block that has not reached the store yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBlock {
    pub kind: ResolverKind,
    pub content: String,
    pub storage: Option<String>,
}

impl NewBlock {
    pub fn new(kind: ResolverKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            storage: None,
        }
    }

    /// Literal text block
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ResolverKind::TEXT, content)
    }

    /// Reference `content` through a registered storage
    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = Some(storage.into());
        self
    }

    pub fn is_literal(&self) -> bool {
        self.storage.is_none()
    }

    /// Text worth embedding; only literal text blocks have one
    pub fn embeddable_text(&self) -> Option<&str> {
        (self.is_literal() && self.kind == ResolverKind::TEXT && !self.content.trim().is_empty())
            .then_some(self.content.as_str())
    }
}

/// How a storage dereferences block content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Content is a URL fetched over HTTP
    Url,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Url => "url",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "url" => Some(StorageKind::Url),
            _ => None,
        }
    }
}

/// External backend that can dereference block content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub name: String,
    pub nickname: Option<String>,
    pub kind: StorageKind,
}

impl Storage {
    pub fn url(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nickname: None,
            kind: StorageKind::Url,
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }
}
