//! Sum types over blocks and relations

use serde::{Deserialize, Serialize};

use super::block::{Block, BlockId, NewBlock};
use super::relation::{NewRelation, Relation};

/// An entity waiting for its store-assigned identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Draft {
    Block(NewBlock),
    Relation(NewRelation),
}

/// A persisted entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    Block(Block),
    Relation(Relation),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Block(_) => EntityKind::Block,
            Entity::Relation(_) => EntityKind::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Entity::Block(block) => block.id.0,
            Entity::Relation(relation) => relation.id.0,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Entity::Block(block) => &block.content,
            Entity::Relation(relation) => &relation.content,
        }
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        match self {
            Entity::Block(block) => block.embedding.as_deref(),
            Entity::Relation(relation) => relation.embedding.as_deref(),
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Entity::Block(block) => Some(block),
            Entity::Relation(_) => None,
        }
    }

    pub fn block_id(&self) -> Option<BlockId> {
        self.as_block().map(|b| b.id)
    }

    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            Entity::Relation(relation) => Some(relation),
            Entity::Block(_) => None,
        }
    }
}

/// Which entity table a query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Block,
    Relation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Block => "block",
            EntityKind::Relation => "relation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "block" | "blocks" => Some(EntityKind::Block),
            "relation" | "relations" => Some(EntityKind::Relation),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity paired with its cosine similarity to a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntity {
    pub entity: Entity,
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!(EntityKind::parse("Block"), Some(EntityKind::Block));
        assert_eq!(EntityKind::parse("relations"), Some(EntityKind::Relation));
        assert_eq!(EntityKind::parse("edge"), None);
        assert_eq!(EntityKind::Relation.to_string(), "relation");
    }

    #[test]
    fn test_draft_serde_tag() {
        let draft = Draft::Block(NewBlock::text("hello"));
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["entity"], "block");
        assert_eq!(json["content"], "hello");
    }
}
