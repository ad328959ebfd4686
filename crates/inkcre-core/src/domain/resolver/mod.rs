//! Resolvers decompose one block into a subgraph of new blocks and relations
//!
//! Extraction is a stepwise exchange. The resolver hands out one draft at a
//! time; the driver persists it and passes the persisted entity back into the
//! next call, so later drafts can reference identities the store assigned.
//! A resolver never touches the store during extraction.

mod image;
mod plan;
mod registry;
mod text;

use async_trait::async_trait;

use crate::error::Result;

use super::context::GraphContext;
use super::graph::{Block, Draft, Entity, ResolverKind};

pub use image::{ALT_TEXT, HAS_CONTENT, IS, ImageResolver, NEEDS, image_source};
pub use plan::{Endpoint, ExtractionPlan, PlannedExtraction};
pub use registry::ResolverRegistry;
pub use text::TextResolver;

/// One step of an extraction
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Persist this draft and pass the result to the next call
    Pending(Draft),
    /// No further drafts
    Done,
}

/// Resumable extraction over one source block
///
/// The first call takes `None`. Every call after a `Pending` step must
/// carry the persisted form of that draft.
#[async_trait]
pub trait Extraction: Send {
    async fn next(&mut self, prior: Option<Entity>) -> Result<Step>;
}

/// Decomposition capability for one block kind
#[async_trait]
pub trait Resolver: Send + Sync {
    fn kind(&self) -> ResolverKind;

    /// Prepare the extraction for `block`; port calls may happen here or
    /// inside the returned iterator
    async fn extract(&self, ctx: &GraphContext, block: &Block) -> Result<Box<dyn Extraction>>;

    /// Render the block as text for prompts and display
    async fn describe(&self, ctx: &GraphContext, block: &Block) -> Result<String>;
}
