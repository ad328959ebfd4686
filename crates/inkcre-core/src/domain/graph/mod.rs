//! Block graph domain model
//!
//! Blocks are atomic content units; relations are directed, labelled
//! edges between them. The graph is a general multigraph: cycles and
//! duplicate edges are allowed.

pub mod block;
pub mod entity;
pub mod event;
pub mod ports;
pub mod relation;
pub mod repository;

pub use block::{Block, BlockId, NewBlock, ResolverKind, Storage, StorageKind};
pub use entity::{Draft, Entity, EntityKind, ScoredEntity};
pub use event::GraphEvent;
pub use ports::{
    ChatPort, ContentResolver, ContentUnderstanding, Embedder, FollowUp, FollowUpScheduler,
    FollowUpTask, ImageAnalysis, ImageDetail, ImageSource,
};
pub use relation::{NewRelation, Relation, RelationId};
pub use repository::{GraphBatch, GraphRepository, GraphStats};
