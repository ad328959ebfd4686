//! Shared fakes and fixtures for the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use inkcre_core::domain::graph::{
    Block, BlockId, ChatPort, ContentUnderstanding, Embedder, FollowUp, FollowUpScheduler,
    GraphRepository, ImageAnalysis, ImageDetail, ImageSource, NewBlock, NewRelation, Relation,
};
use inkcre_core::domain::resolver::ResolverRegistry;
use inkcre_core::domain::{GraphContext, GraphService};
use inkcre_core::infrastructure::SqliteGraphRepository;
use inkcre_core::llm::Message;
use inkcre_core::storage::Database;
use inkcre_core::{Error, Result};

// ========== Store ==========

pub async fn repository() -> Arc<SqliteGraphRepository> {
    let db = Database::in_memory()
        .await
        .expect("Failed to create in-memory database");
    Arc::new(SqliteGraphRepository::new(db.pool().clone()))
}

pub async fn text_block(
    repo: &dyn GraphRepository,
    content: &str,
    embedding: Option<&[f32]>,
) -> Block {
    let mut batch = repo.begin_batch().await.unwrap();
    let block = batch
        .create_block(&NewBlock::text(content), embedding)
        .await
        .unwrap();
    batch.commit().await.unwrap();
    block
}

pub async fn block(repo: &dyn GraphRepository, draft: NewBlock) -> Block {
    let mut batch = repo.begin_batch().await.unwrap();
    let block = batch.create_block(&draft, None).await.unwrap();
    batch.commit().await.unwrap();
    block
}

pub async fn relate(repo: &dyn GraphRepository, from: BlockId, to: BlockId, label: &str) -> Relation {
    let mut batch = repo.begin_batch().await.unwrap();
    let relation = batch
        .create_relation(&NewRelation::new(from, to, label), None)
        .await
        .unwrap();
    batch.commit().await.unwrap();
    relation
}

pub fn service(ctx: GraphContext) -> GraphService {
    GraphService::new(ctx, ResolverRegistry::with_builtins())
}

// ========== Chat ==========

/// Replies from a script, recording every request
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    repeat: Option<String>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedChat {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Default::default()
        })
    }

    /// Same reply on every call
    pub fn repeating(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            repeat: Some(reply.into()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Text of the last user message of call `index`
    pub fn last_user_text(&self, index: usize) -> String {
        let requests = self.requests.lock().unwrap();
        requests[index]
            .last()
            .map(|message| message.text())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatPort for ScriptedChat {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        self.requests.lock().unwrap().push(messages);
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        self.repeat
            .clone()
            .ok_or_else(|| Error::LLMError("script exhausted".to_string()))
    }
}

// ========== Vision ==========

pub struct FixedVision {
    analysis: ImageAnalysis,
    seen: Mutex<Vec<ImageSource>>,
}

impl FixedVision {
    pub fn new(analysis: ImageAnalysis) -> Arc<Self> {
        Arc::new(Self {
            analysis,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<ImageSource> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentUnderstanding for FixedVision {
    async fn analyze(&self, image: &ImageSource) -> Result<ImageAnalysis> {
        self.seen.lock().unwrap().push(image.clone());
        Ok(self.analysis.clone())
    }
}

pub struct FailingVision;

#[async_trait]
impl ContentUnderstanding for FailingVision {
    async fn analyze(&self, _image: &ImageSource) -> Result<ImageAnalysis> {
        Err(Error::LLMError("vision model unavailable".to_string()))
    }
}

/// Never answers; used for timeout and cancellation
pub struct StalledVision;

#[async_trait]
impl ContentUnderstanding for StalledVision {
    async fn analyze(&self, _image: &ImageSource) -> Result<ImageAnalysis> {
        std::future::pending::<()>().await;
        Err(Error::Other("unreachable".to_string()))
    }
}

/// One detail with two actions: five blocks and five relations
pub fn poster_analysis() -> ImageAnalysis {
    ImageAnalysis {
        summary: "A concert poster".to_string(),
        details: vec![ImageDetail {
            content: "May 4, 8pm".to_string(),
            kind: "date".to_string(),
            actions: vec!["buy tickets".to_string(), "plan the evening".to_string()],
        }],
    }
}

// ========== Embeddings ==========

/// Known texts map to fixed vectors; anything else gets a byte histogram
#[derive(Default)]
pub struct MapEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fail: bool,
}

pub const EMBEDDING_DIM: usize = 3;

impl MapEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(entries: &[(&str, [f32; EMBEDDING_DIM])]) -> Arc<Self> {
        Arc::new(Self {
            vectors: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.to_vec()))
                .collect(),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Embedder for MapEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(Error::EmbeddingFailed("embedding service down".to_string()));
        }
        if let Some(vector) = self.vectors.get(text) {
            return Ok(vector.clone());
        }
        let mut vector = vec![0.0; EMBEDDING_DIM];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % EMBEDDING_DIM] += byte as f32;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

// ========== Scheduling ==========

#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<FollowUp>>,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scheduled(&self) -> Vec<FollowUp> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl FollowUpScheduler for RecordingScheduler {
    fn schedule(&self, follow_up: FollowUp) -> Result<()> {
        self.scheduled.lock().unwrap().push(follow_up);
        Ok(())
    }
}
