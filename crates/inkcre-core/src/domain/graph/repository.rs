//! Persistence port for the block graph
//!
//! The store owns identity assignment. Writes go through a [`GraphBatch`]
//! so that one organize run becomes visible as a single unit.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

use super::block::{Block, BlockId, NewBlock, Storage};
use super::entity::{Draft, Entity, EntityKind};
use super::relation::{NewRelation, Relation, RelationId};

/// Repository trait for block graph persistence
#[async_trait]
pub trait GraphRepository: Send + Sync {
    // ========== Writes ==========

    /// Open an atomic batch of writes
    async fn begin_batch(&self) -> Result<Box<dyn GraphBatch>>;

    /// Replace a block's embedding and bump its update time
    async fn update_block_embedding(&self, id: BlockId, embedding: &[f32]) -> Result<()>;

    /// Register or update a storage backend
    async fn save_storage(&self, storage: &Storage) -> Result<()>;

    // ========== Reads ==========

    async fn get_block(&self, id: BlockId) -> Result<Option<Block>>;

    async fn get_relation(&self, id: RelationId) -> Result<Option<Relation>>;

    /// Relations whose `from` is `block`, oldest first
    async fn list_outgoing(&self, block: BlockId) -> Result<Vec<Relation>>;

    /// Relations whose `to` is `block`, oldest first
    async fn list_incoming(&self, block: BlockId) -> Result<Vec<Relation>>;

    /// Outgoing relations of `block` carrying exactly `label`
    async fn find_outgoing_by_label(&self, block: BlockId, label: &str) -> Result<Vec<Relation>>;

    /// Most recently updated blocks first
    async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>>;

    /// Every stored embedding of the given entity kind as `(id, vector)`
    async fn list_embeddings(&self, kind: EntityKind) -> Result<Vec<(i64, Vec<f32>)>>;

    async fn get_storage(&self, name: &str) -> Result<Option<Storage>>;

    async fn get_stats(&self) -> Result<GraphStats>;

    /// Fetch either kind of entity by id
    async fn get_entity(&self, kind: EntityKind, id: i64) -> Result<Option<Entity>> {
        Ok(match kind {
            EntityKind::Block => self.get_block(BlockId(id)).await?.map(Entity::Block),
            EntityKind::Relation => self
                .get_relation(RelationId(id))
                .await?
                .map(Entity::Relation),
        })
    }
}

/// An open, uncommitted set of writes
///
/// Nothing created through a batch is visible to readers before
/// [`GraphBatch::commit`]. Dropping a batch without committing discards it.
#[async_trait]
pub trait GraphBatch: Send {
    async fn create_block(&mut self, draft: &NewBlock, embedding: Option<&[f32]>) -> Result<Block>;

    /// Fails with `EntityNotFound` unless both endpoints exist, either
    /// committed or created earlier in this batch
    async fn create_relation(
        &mut self,
        draft: &NewRelation,
        embedding: Option<&[f32]>,
    ) -> Result<Relation>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Persist any draft, returning it with its assigned identity
    async fn create(&mut self, draft: &Draft, embedding: Option<&[f32]>) -> Result<Entity> {
        Ok(match draft {
            Draft::Block(block) => Entity::Block(self.create_block(block, embedding).await?),
            Draft::Relation(relation) => {
                Entity::Relation(self.create_relation(relation, embedding).await?)
            }
        })
    }
}

/// Statistics about the block graph
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub total_blocks: u64,
    pub total_relations: u64,
    pub blocks_with_embeddings: u64,
    pub relations_with_embeddings: u64,
    pub blocks_by_kind: Vec<(String, u64)>,
}
