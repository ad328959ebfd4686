use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::context::GraphContext;
use crate::domain::graph::{Block, ResolverKind};
use crate::error::{Error, Result};

use super::{ImageResolver, Resolver, TextResolver};

/// Lookup from block kind to the resolver that handles it
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<ResolverKind, Arc<dyn Resolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ResolverRegistry {
    /// Registry without any resolver
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the `text` and `image` resolvers
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TextResolver));
        registry.register(Arc::new(ImageResolver));
        registry
    }

    /// Add a resolver, replacing any previous one for the same kind
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) -> Option<Arc<dyn Resolver>> {
        let kind = resolver.kind();
        debug!(kind = %kind, "Registering resolver");
        self.resolvers.insert(kind, resolver)
    }

    pub fn get(&self, kind: &ResolverKind) -> Result<Arc<dyn Resolver>> {
        self.resolvers
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnsupportedKind(kind.to_string()))
    }

    pub fn supports(&self, kind: &ResolverKind) -> bool {
        self.resolvers.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<ResolverKind> {
        let mut kinds: Vec<_> = self.resolvers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Render any block as text
    pub async fn describe(&self, ctx: &GraphContext, block: &Block) -> Result<String> {
        match self.resolvers.get(&block.kind) {
            Some(resolver) => resolver.describe(ctx, block).await,
            None if block.is_literal() => Ok(block.content.clone()),
            None => Err(Error::UnsupportedKind(block.kind.to_string())),
        }
    }
}
