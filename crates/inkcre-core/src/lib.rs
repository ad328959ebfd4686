//! InKCre Core Library
//!
//! A personal knowledge graph built from blocks and relations:
//! - Domain model, resolver protocol and the organize pipeline
//! - Traversal, similarity and LLM-driven search
//! - Storage (SQLite)
//! - LLM integration (OpenAI-compatible API)
//! - Configuration

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod llm;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::graph::{Block, BlockId, NewBlock, Relation, RelationId, ResolverKind};
    pub use crate::domain::{GraphContext, GraphService};
    pub use crate::error::{Error, Result};
}
