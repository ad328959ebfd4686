//! Relation: a directed, labelled edge between two blocks

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::block::BlockId;
use crate::error::Error;

/// Store-assigned relation identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(pub i64);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(RelationId)
            .map_err(|_| Error::InvalidInput(format!("'{}' is not a relation id", s)))
    }
}

impl From<RelationId> for i64 {
    fn from(id: RelationId) -> Self {
        id.0
    }
}

/// A persisted relation. Read as "`to` is the `content` of `from`".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub from: BlockId,
    pub to: BlockId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    /// Both endpoints resolve to existing blocks
    pub fn is_valid(&self, exists: impl Fn(BlockId) -> bool) -> bool {
        exists(self.from) && exists(self.to)
    }
}

/// A relation between persisted blocks that has not reached the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelation {
    pub from: BlockId,
    pub to: BlockId,
    pub content: String,
}

impl NewRelation {
    pub fn new(from: BlockId, to: BlockId, content: impl Into<String>) -> Self {
        Self {
            from,
            to,
            content: content.into(),
        }
    }

    pub fn is_valid(&self, exists: impl Fn(BlockId) -> bool) -> bool {
        exists(self.from) && exists(self.to)
    }
}
