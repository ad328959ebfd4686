//! Domain events recorded by the graph service for auditing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::block::{BlockId, ResolverKind};
use super::relation::RelationId;

/// Events that can occur in the block graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A block was created directly
    BlockCreated {
        block_id: BlockId,
        kind: ResolverKind,
        timestamp: DateTime<Utc>,
    },
    /// A relation was created directly
    RelationCreated {
        relation_id: RelationId,
        from: BlockId,
        to: BlockId,
        label: String,
        timestamp: DateTime<Utc>,
    },
    /// An organize run committed its subgraph
    BlockOrganized {
        block_id: BlockId,
        blocks_created: Vec<BlockId>,
        relations_created: Vec<RelationId>,
        timestamp: DateTime<Utc>,
    },
    /// A block's embedding was recomputed
    EmbeddingRefreshed {
        block_id: BlockId,
        timestamp: DateTime<Utc>,
    },
    /// A traversal or search was run
    GraphSearched {
        operation: String,
        start: Option<BlockId>,
        result_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl GraphEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::BlockCreated { timestamp, .. }
            | Self::RelationCreated { timestamp, .. }
            | Self::BlockOrganized { timestamp, .. }
            | Self::EmbeddingRefreshed { timestamp, .. }
            | Self::GraphSearched { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::BlockCreated { .. } => "block_created",
            Self::RelationCreated { .. } => "relation_created",
            Self::BlockOrganized { .. } => "block_organized",
            Self::EmbeddingRefreshed { .. } => "embedding_refreshed",
            Self::GraphSearched { .. } => "graph_searched",
        }
    }

    /// The block the event is about, if any
    pub fn block_id(&self) -> Option<BlockId> {
        match self {
            Self::BlockCreated { block_id, .. }
            | Self::BlockOrganized { block_id, .. }
            | Self::EmbeddingRefreshed { block_id, .. } => Some(*block_id),
            Self::RelationCreated { from, .. } => Some(*from),
            Self::GraphSearched { start, .. } => *start,
        }
    }

    pub fn block_created(block_id: BlockId, kind: ResolverKind) -> Self {
        Self::BlockCreated {
            block_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn relation_created(
        relation_id: RelationId,
        from: BlockId,
        to: BlockId,
        label: impl Into<String>,
    ) -> Self {
        Self::RelationCreated {
            relation_id,
            from,
            to,
            label: label.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn block_organized(
        block_id: BlockId,
        blocks_created: Vec<BlockId>,
        relations_created: Vec<RelationId>,
    ) -> Self {
        Self::BlockOrganized {
            block_id,
            blocks_created,
            relations_created,
            timestamp: Utc::now(),
        }
    }

    pub fn embedding_refreshed(block_id: BlockId) -> Self {
        Self::EmbeddingRefreshed {
            block_id,
            timestamp: Utc::now(),
        }
    }

    pub fn graph_searched(
        operation: impl Into<String>,
        start: Option<BlockId>,
        result_count: usize,
    ) -> Self {
        Self::GraphSearched {
            operation: operation.into(),
            start,
            result_count,
            timestamp: Utc::now(),
        }
    }
}
