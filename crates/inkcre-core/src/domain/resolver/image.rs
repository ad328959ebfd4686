use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::context::GraphContext;
use crate::domain::graph::{
    Block, BlockId, ImageAnalysis, ImageSource, NewBlock, NewRelation, ResolverKind, StorageKind,
};
use crate::error::{Error, Result};

use super::plan::{Endpoint, ExtractionPlan};
use super::{Extraction, Resolver};

/// Label from an image to its textual summary
pub const ALT_TEXT: &str = "alt:text";
/// Label from an image to a key piece of information in it
pub const HAS_CONTENT: &str = "has content";
/// Label from a piece of information to its type
pub const IS: &str = "is";
/// Label from an action to the information type it needs
pub const NEEDS: &str = "needs";

/// Decomposes an image into a summary plus a key-information graph
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageResolver;

impl ImageResolver {
    /// Lay out the subgraph for one analysis
    ///
    /// Summary first, then per detail: content, type, and each action.
    pub fn plan(source: BlockId, analysis: &ImageAnalysis) -> ExtractionPlan {
        let mut plan = ExtractionPlan::new(source);

        let summary = plan.block(NewBlock::text(&analysis.summary));
        plan.relate(Endpoint::Source, summary, ALT_TEXT);

        for detail in &analysis.details {
            let content = plan.block(NewBlock::text(&detail.content));
            plan.relate(Endpoint::Source, content, HAS_CONTENT);

            let kind = plan.block(NewBlock::text(&detail.kind));
            plan.relate(content, kind, IS);

            for action in &detail.actions {
                let action = plan.block(NewBlock::text(action));
                plan.relate(action, kind, NEEDS);
            }
        }

        plan
    }
}

/// Where the image behind `block` can be read from
pub async fn image_source(ctx: &GraphContext, block: &Block) -> Result<ImageSource> {
    let Some(storage_name) = &block.storage else {
        return ImageSource::from_inline(&block.content);
    };

    let storage = ctx
        .repository()
        .get_storage(storage_name)
        .await?
        .ok_or_else(|| Error::StorageNotFound(storage_name.clone()))?;

    match storage.kind {
        StorageKind::Url => Ok(ImageSource::Url(block.content.clone())),
    }
}

#[async_trait]
impl Resolver for ImageResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::IMAGE
    }

    async fn extract(&self, ctx: &GraphContext, block: &Block) -> Result<Box<dyn Extraction>> {
        let source = image_source(ctx, block).await?;
        let analysis = ctx.require_vision()?.analyze(&source).await?;

        debug!(
            block_id = %block.id,
            details = analysis.details.len(),
            "Image analyzed"
        );

        Ok(Box::new(Self::plan(block.id, &analysis).into_extraction()))
    }

    async fn describe(&self, ctx: &GraphContext, block: &Block) -> Result<String> {
        let repository = ctx.repository();

        for relation in repository.find_outgoing_by_label(block.id, ALT_TEXT).await? {
            match repository.get_block(relation.to).await? {
                Some(summary) => return Ok(summary.content),
                None => warn!(
                    block_id = %block.id,
                    relation_id = %relation.id,
                    "alt:text relation points at a missing block"
                ),
            }
        }

        let source = image_source(ctx, block).await?;
        let analysis = ctx.require_vision()?.analyze(&source).await?;

        let draft = NewBlock::text(&analysis.summary);
        let embedding = match (ctx.embedder(), draft.embeddable_text()) {
            (Some(embedder), Some(text)) => Some(embedder.embed(text).await?),
            _ => None,
        };

        let mut batch = repository.begin_batch().await?;
        let persisted = async {
            let summary = batch.create_block(&draft, embedding.as_deref()).await?;
            batch
                .create_relation(&NewRelation::new(block.id, summary.id, ALT_TEXT), None)
                .await?;
            Ok::<_, Error>(summary)
        }
        .await;

        match persisted {
            Ok(summary) => {
                batch.commit().await?;
                debug!(block_id = %block.id, summary_id = %summary.id, "Stored alt:text summary");
                Ok(analysis.summary)
            }
            Err(e) => {
                if let Err(rollback) = batch.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}
