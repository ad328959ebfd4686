//! Block graph service
//!
//! Facade over the engine operations. Holds the context and resolver
//! registry, applies configured defaults, and records a [`GraphEvent`]
//! per mutation or search for auditing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

use super::agentic::{AgenticSearch, SearchOutcome};
use super::context::GraphContext;
use super::graph::{
    Block, BlockId, EntityKind, FollowUp, GraphEvent, GraphStats, NewBlock, NewRelation, Relation,
    RelationId, ScoredEntity, Storage,
};
use super::organize::{OrganizeOutcome, Organizer};
use super::pick;
use super::resolver::ResolverRegistry;
use super::similarity;
use super::traversal::{self, Reachable};

/// Events kept before the oldest are dropped
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Defaults applied when callers don't pass explicit values
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub organize_timeout: Duration,
    pub max_steps: usize,
    pub k: usize,
    pub min_similarity: f32,
    pub traverse_depth: usize,
    /// Upper bound on the in-memory event log
    pub event_capacity: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            organize_timeout: Duration::from_secs(config.organize.timeout_secs),
            max_steps: config.search.max_steps,
            k: config.search.k,
            min_similarity: config.search.min_similarity,
            traverse_depth: config.search.traverse_depth,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

pub struct GraphService {
    ctx: GraphContext,
    registry: ResolverRegistry,
    organizer: Organizer,
    agent: AgenticSearch,
    settings: ServiceSettings,
    events: Mutex<VecDeque<GraphEvent>>,
}

impl GraphService {
    pub fn new(ctx: GraphContext, registry: ResolverRegistry) -> Self {
        Self::with_settings(ctx, registry, ServiceSettings::default())
    }

    pub fn with_settings(
        ctx: GraphContext,
        registry: ResolverRegistry,
        settings: ServiceSettings,
    ) -> Self {
        let organizer =
            Organizer::new(ctx.clone(), registry.clone()).with_timeout(settings.organize_timeout);
        let agent = AgenticSearch::new(ctx.clone(), registry.clone()).with_max_steps(settings.max_steps);
        Self {
            ctx,
            registry,
            organizer,
            agent,
            settings,
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn context(&self) -> &GraphContext {
        &self.ctx
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn organizer(&self) -> &Organizer {
        &self.organizer
    }

    // ========== Writes ==========

    /// Persist one block, optionally scheduling an organize for it
    pub async fn create_block(&self, draft: NewBlock, organize: bool) -> Result<Block> {
        if let Some(storage) = &draft.storage
            && self.ctx.repository().get_storage(storage).await?.is_none()
        {
            return Err(Error::StorageNotFound(storage.clone()));
        }

        let embedding = match (self.ctx.embedder(), draft.embeddable_text()) {
            (Some(embedder), Some(text)) => Some(embedder.embed(text).await?),
            _ => None,
        };

        let mut batch = self.ctx.repository().begin_batch().await?;
        let block = batch.create_block(&draft, embedding.as_deref()).await?;
        batch.commit().await?;

        info!(block_id = %block.id, kind = %block.kind, "Block created");
        self.record(GraphEvent::block_created(block.id, block.kind.clone()));

        if organize {
            match self.ctx.scheduler() {
                Some(scheduler) => {
                    if let Err(e) = scheduler.schedule(FollowUp::organize(block.id)) {
                        warn!(block_id = %block.id, error = %e, "Failed to schedule organize");
                    }
                }
                None => warn!(block_id = %block.id, "No scheduler configured, organize skipped"),
            }
        }

        Ok(block)
    }

    /// Manually relate two existing blocks
    pub async fn create_relation(&self, from: BlockId, to: BlockId, label: &str) -> Result<Relation> {
        let label = label.trim();
        if label.is_empty() {
            return Err(Error::InvalidInput("relation label cannot be empty".to_string()));
        }

        let embedding = match self.ctx.embedder() {
            Some(embedder) => Some(embedder.embed(label).await?),
            None => None,
        };

        let mut batch = self.ctx.repository().begin_batch().await?;
        let relation = batch
            .create_relation(&NewRelation::new(from, to, label), embedding.as_deref())
            .await?;
        batch.commit().await?;

        info!(relation_id = %relation.id, from = %from, to = %to, "Relation created");
        self.record(GraphEvent::relation_created(relation.id, from, to, label));

        Ok(relation)
    }

    pub async fn register_storage(&self, storage: Storage) -> Result<()> {
        self.ctx.repository().save_storage(&storage).await
    }

    /// Recompute a block's embedding from its literal text
    pub async fn refresh_embedding(&self, id: BlockId) -> Result<Vec<f32>> {
        let block = self.get_block(id).await?;
        let draft = NewBlock {
            kind: block.kind,
            content: block.content,
            storage: block.storage,
        };
        let text = draft.embeddable_text().ok_or_else(|| {
            Error::InvalidInput(format!("block {} has no literal text to embed", id))
        })?;

        let embedding = self.ctx.require_embedder()?.embed(text).await?;
        self.ctx
            .repository()
            .update_block_embedding(id, &embedding)
            .await?;

        debug!(block_id = %id, dimension = embedding.len(), "Embedding refreshed");
        self.record(GraphEvent::embedding_refreshed(id));

        Ok(embedding)
    }

    /// Decompose a block and commit the subgraph
    pub async fn organize(&self, id: BlockId, cancel: &CancellationToken) -> Result<OrganizeOutcome> {
        let block = self.get_block(id).await?;
        let outcome = self.organizer.organize(&block, cancel).await?;

        self.record(GraphEvent::block_organized(
            id,
            outcome.blocks.iter().map(|b| b.id).collect(),
            outcome.relations.iter().map(|r| r.id).collect(),
        ));

        Ok(outcome)
    }

    // ========== Reads ==========

    pub async fn get_block(&self, id: BlockId) -> Result<Block> {
        self.ctx
            .repository()
            .get_block(id)
            .await?
            .ok_or_else(|| Error::block_not_found(id))
    }

    pub async fn get_relation(&self, id: RelationId) -> Result<Relation> {
        self.ctx
            .repository()
            .get_relation(id)
            .await?
            .ok_or_else(|| Error::relation_not_found(id))
    }

    pub async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>> {
        self.ctx.repository().recent_blocks(limit).await
    }

    /// Outgoing and incoming relations of a block
    pub async fn neighbors(&self, id: BlockId) -> Result<(Vec<Relation>, Vec<Relation>)> {
        let repository = self.ctx.repository();
        Ok((
            repository.list_outgoing(id).await?,
            repository.list_incoming(id).await?,
        ))
    }

    /// Render a block as text
    pub async fn describe(&self, id: BlockId) -> Result<String> {
        let block = self.get_block(id).await?;
        self.registry.describe(&self.ctx, &block).await
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        self.ctx.repository().get_stats().await
    }

    // ========== Search ==========

    pub async fn traverse(
        &self,
        start: BlockId,
        max_depth: Option<usize>,
        exclude_start: bool,
    ) -> Result<Reachable> {
        let depth = max_depth.unwrap_or(self.settings.traverse_depth);
        let reachable =
            traversal::traverse(self.ctx.repository().as_ref(), start, depth, exclude_start).await?;

        self.record(GraphEvent::graph_searched(
            "traverse",
            Some(start),
            reachable.blocks.len(),
        ));
        Ok(reachable)
    }

    pub async fn nearest(
        &self,
        query: BlockId,
        kind: EntityKind,
        k: Option<usize>,
        min_similarity: Option<f32>,
    ) -> Result<Vec<ScoredEntity>> {
        let results = similarity::nearest(
            self.ctx.repository().as_ref(),
            query,
            kind,
            k.unwrap_or(self.settings.k),
            min_similarity.unwrap_or(self.settings.min_similarity),
        )
        .await?;

        self.record(GraphEvent::graph_searched("nearest", Some(query), results.len()));
        Ok(results)
    }

    pub async fn agentic_search(
        &self,
        start: BlockId,
        requirement: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome> {
        let outcome = self.agent.search(start, requirement, cancel).await?;
        self.record_search("agentic_search", Some(start), &outcome);
        Ok(outcome)
    }

    pub async fn agentic_search_from_query(
        &self,
        query: BlockId,
        requirement: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome> {
        let outcome = self.agent.search_from_query(query, requirement, cancel).await?;
        self.record_search("agentic_search_from_query", Some(query), &outcome);
        Ok(outcome)
    }

    pub async fn pick_blocks(
        &self,
        blocks: &[BlockId],
        relations: &[RelationId],
        requirements: &[String],
    ) -> Result<Vec<BlockId>> {
        let picked = pick::pick_blocks(&self.ctx, blocks, relations, requirements).await?;
        self.record(GraphEvent::graph_searched("pick", None, picked.len()));
        Ok(picked)
    }

    // ========== Events ==========

    /// Recorded events, oldest first
    ///
    /// Only the latest `event_capacity` events are kept.
    pub fn events(&self) -> Vec<GraphEvent> {
        self.event_log().iter().cloned().collect()
    }

    /// Drain recorded events
    pub fn take_events(&self) -> Vec<GraphEvent> {
        self.event_log().drain(..).collect()
    }

    fn record(&self, event: GraphEvent) {
        let capacity = self.settings.event_capacity;
        if capacity == 0 {
            return;
        }
        let mut events = self.event_log();
        while events.len() >= capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    // A panic while holding the lock leaves the log intact, so keep using it
    fn event_log(&self) -> MutexGuard<'_, VecDeque<GraphEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| {
            warn!("Event log lock was poisoned; recovering");
            self.events.clear_poison();
            poisoned.into_inner()
        })
    }

    fn record_search(&self, operation: &str, start: Option<BlockId>, outcome: &SearchOutcome) {
        let count = outcome.found().map_or(0, |ids| ids.len());
        self.record(GraphEvent::graph_searched(operation, start, count));
    }
}
