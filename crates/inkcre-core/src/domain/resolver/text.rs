use async_trait::async_trait;

use crate::domain::context::GraphContext;
use crate::domain::graph::{Block, ResolverKind};
use crate::error::{Error, Result};

use super::plan::ExtractionPlan;
use super::{Extraction, Resolver};

/// Text is already atomic: extraction yields nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct TextResolver;

#[async_trait]
impl Resolver for TextResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::TEXT
    }

    async fn extract(&self, _ctx: &GraphContext, block: &Block) -> Result<Box<dyn Extraction>> {
        Ok(Box::new(ExtractionPlan::new(block.id).into_extraction()))
    }

    async fn describe(&self, ctx: &GraphContext, block: &Block) -> Result<String> {
        let Some(storage_name) = &block.storage else {
            return Ok(block.content.clone());
        };

        let storage = ctx
            .repository()
            .get_storage(storage_name)
            .await?
            .ok_or_else(|| Error::StorageNotFound(storage_name.clone()))?;

        ctx.require_content_resolver()?
            .resolve_text(&storage, &block.content)
            .await
    }
}
