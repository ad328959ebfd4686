//! Explicit context carrying every port the engine talks to
//!
//! Built once per process and passed to each operation; tests build one
//! from fakes.

use std::sync::Arc;

use crate::error::{Error, Result};

use super::graph::{
    ChatPort, ContentResolver, ContentUnderstanding, Embedder, FollowUpScheduler, GraphRepository,
};

#[derive(Clone)]
pub struct GraphContext {
    repository: Arc<dyn GraphRepository>,
    embedder: Option<Arc<dyn Embedder>>,
    chat: Option<Arc<dyn ChatPort>>,
    vision: Option<Arc<dyn ContentUnderstanding>>,
    content: Option<Arc<dyn ContentResolver>>,
    scheduler: Option<Arc<dyn FollowUpScheduler>>,
}

impl std::fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphContext")
            .field("embedder", &self.embedder.is_some())
            .field("chat", &self.chat.is_some())
            .field("vision", &self.vision.is_some())
            .field("content", &self.content.is_some())
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

impl GraphContext {
    pub fn new(repository: Arc<dyn GraphRepository>) -> Self {
        Self {
            repository,
            embedder: None,
            chat: None,
            vision: None,
            content: None,
            scheduler: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatPort>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_vision(mut self, vision: Arc<dyn ContentUnderstanding>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_content_resolver(mut self, content: Arc<dyn ContentResolver>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn FollowUpScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn repository(&self) -> &Arc<dyn GraphRepository> {
        &self.repository
    }

    /// The embedder, when one is configured
    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    pub fn scheduler(&self) -> Option<&Arc<dyn FollowUpScheduler>> {
        self.scheduler.as_ref()
    }

    pub fn require_embedder(&self) -> Result<&Arc<dyn Embedder>> {
        self.embedder
            .as_ref()
            .ok_or_else(|| missing("embedding provider"))
    }

    pub fn require_chat(&self) -> Result<&Arc<dyn ChatPort>> {
        self.chat.as_ref().ok_or_else(|| missing("chat provider"))
    }

    pub fn require_vision(&self) -> Result<&Arc<dyn ContentUnderstanding>> {
        self.vision
            .as_ref()
            .ok_or_else(|| missing("content-understanding provider"))
    }

    pub fn require_content_resolver(&self) -> Result<&Arc<dyn ContentResolver>> {
        self.content
            .as_ref()
            .ok_or_else(|| missing("content resolver"))
    }
}

fn missing(port: &str) -> Error {
    Error::ConfigError(format!("no {} configured", port))
}
