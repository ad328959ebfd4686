//! Organize pipeline: run a resolver to completion and commit atomically

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::context::GraphContext;
use super::graph::{Block, BlockId, Draft, Entity, FollowUp, GraphBatch, Relation};
use super::resolver::{Extraction, Resolver, ResolverRegistry, Step};

/// Default bound for one extraction
pub const DEFAULT_ORGANIZE_TIMEOUT: Duration = Duration::from_secs(120);

/// Committed result of one organize run
#[derive(Debug, Clone, Serialize)]
pub struct OrganizeOutcome {
    pub source: BlockId,
    /// Created blocks, in creation order
    pub blocks: Vec<Block>,
    /// Created relations, in creation order
    pub relations: Vec<Relation>,
    pub follow_ups_scheduled: usize,
}

/// Drives extraction against the persistence port
#[derive(Debug, Clone)]
pub struct Organizer {
    ctx: GraphContext,
    registry: ResolverRegistry,
    timeout: Duration,
}

#[derive(Default)]
struct Created {
    blocks: Vec<Block>,
    relations: Vec<Relation>,
}

impl Organizer {
    pub fn new(ctx: GraphContext, registry: ResolverRegistry) -> Self {
        Self {
            ctx,
            registry,
            timeout: DEFAULT_ORGANIZE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Decompose `block` and persist the resulting subgraph
    ///
    /// Either every draft of the run becomes visible or none does. After a
    /// successful commit one follow-up is scheduled per created block.
    pub async fn organize(&self, block: &Block, cancel: &CancellationToken) -> Result<OrganizeOutcome> {
        let resolver = self.registry.get(&block.kind)?;

        info!(block_id = %block.id, kind = %block.kind, "Organizing block");

        let timeout = self.timeout;
        let run = tokio::time::timeout(timeout, self.run(resolver.as_ref(), block));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = run => outcome.unwrap_or_else(|_| {
                Err(Error::ExtractionFailed(format!(
                    "extraction timed out after {}s",
                    timeout.as_secs_f32()
                )))
            }),
        };

        // An abandoned run drops its batch, which discards the writes
        let (batch, created) = match result {
            Ok(staged) => staged,
            Err(e) => {
                warn!(block_id = %block.id, error = %e, "Organize failed");
                return Err(e);
            }
        };

        batch.commit().await?;

        info!(
            block_id = %block.id,
            blocks = created.blocks.len(),
            relations = created.relations.len(),
            "Organize committed"
        );

        let follow_ups_scheduled = self.schedule_follow_ups(&created.blocks);

        Ok(OrganizeOutcome {
            source: block.id,
            blocks: created.blocks,
            relations: created.relations,
            follow_ups_scheduled,
        })
    }

    /// Extract, then stage every draft in one batch
    ///
    /// The draft/persist exchange is strictly sequential. On error the
    /// batch is rolled back before returning.
    async fn run(
        &self,
        resolver: &dyn Resolver,
        block: &Block,
    ) -> Result<(Box<dyn GraphBatch>, Created)> {
        let extraction: Box<dyn Extraction> = resolver
            .extract(&self.ctx, block)
            .await
            .map_err(extraction_failed)?;

        let mut batch = self.ctx.repository().begin_batch().await?;
        match self.stage(extraction, block, batch.as_mut()).await {
            Ok(created) => Ok((batch, created)),
            Err(e) => {
                if let Err(rollback) = batch.rollback().await {
                    warn!(block_id = %block.id, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn stage(
        &self,
        mut extraction: Box<dyn Extraction>,
        block: &Block,
        batch: &mut dyn GraphBatch,
    ) -> Result<Created> {
        let mut created = Created::default();
        let mut prior: Option<Entity> = None;

        loop {
            let draft = match extraction.next(prior.take()).await.map_err(extraction_failed)? {
                Step::Done => break,
                Step::Pending(draft) => draft,
            };

            let embedding = self.embed_draft(&draft).await?;
            let entity = batch.create(&draft, embedding.as_deref()).await?;

            match &entity {
                Entity::Block(b) => {
                    debug!(source = %block.id, block_id = %b.id, "Persisted draft block");
                    created.blocks.push(b.clone());
                }
                Entity::Relation(r) => {
                    debug!(
                        source = %block.id,
                        relation_id = %r.id,
                        from = %r.from,
                        to = %r.to,
                        label = %r.content,
                        "Persisted draft relation"
                    );
                    created.relations.push(r.clone());
                }
            }

            prior = Some(entity);
        }

        Ok(created)
    }

    async fn embed_draft(&self, draft: &Draft) -> Result<Option<Vec<f32>>> {
        let Some(embedder) = self.ctx.embedder() else {
            return Ok(None);
        };

        let text = match draft {
            Draft::Block(block) => block.embeddable_text(),
            Draft::Relation(relation) => Some(relation.content.as_str()),
        };

        match text {
            Some(text) if !text.trim().is_empty() => embedder
                .embed(text)
                .await
                .map(Some)
                .map_err(extraction_failed),
            _ => Ok(None),
        }
    }

    fn schedule_follow_ups(&self, blocks: &[Block]) -> usize {
        let Some(scheduler) = self.ctx.scheduler() else {
            return 0;
        };

        blocks
            .iter()
            .filter(|block| match scheduler.schedule(FollowUp::organize(block.id)) {
                Ok(()) => true,
                Err(e) => {
                    warn!(block_id = %block.id, error = %e, "Failed to schedule follow-up");
                    false
                }
            })
            .count()
    }
}

/// Port failures during extraction surface as `ExtractionFailed`
fn extraction_failed(error: Error) -> Error {
    match error {
        Error::ExtractionFailed(_)
        | Error::Cancelled
        | Error::UnsupportedKind(_)
        | Error::StorageNotFound(_)
        | Error::ConfigError(_) => error,
        other => Error::ExtractionFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_failed_mapping() {
        let mapped = extraction_failed(Error::LLMError("boom".to_string()));
        assert!(matches!(mapped, Error::ExtractionFailed(msg) if msg.contains("boom")));

        let mapped = extraction_failed(Error::RateLimited(3));
        assert!(matches!(mapped, Error::ExtractionFailed(_)));

        assert!(matches!(extraction_failed(Error::Cancelled), Error::Cancelled));
        assert!(matches!(
            extraction_failed(Error::StorageNotFound("web".to_string())),
            Error::StorageNotFound(_)
        ));
    }
}
