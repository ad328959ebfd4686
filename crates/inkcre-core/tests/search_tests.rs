//! Read-side queries: traversal, similarity, agentic search and pick

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use common::*;
use inkcre_core::domain::graph::{
    Block, BlockId, EntityKind, GraphBatch, GraphRepository, GraphStats, NewRelation, Relation,
    RelationId, Storage,
};
use inkcre_core::infrastructure::SqliteGraphRepository;
use inkcre_core::{Error, Result};
use inkcre_core::domain::resolver::ResolverRegistry;
use inkcre_core::domain::similarity::{nearest, nearest_to_embedding};
use inkcre_core::domain::{AgenticSearch, GraphContext, SearchState, traverse};

fn ids(blocks: &[BlockId]) -> BTreeSet<BlockId> {
    blocks.iter().copied().collect()
}

// ========== Traversal ==========

#[tokio::test]
async fn test_traverse_terminates_on_cycle() {
    let repo = repository().await;
    let a = text_block(&*repo, "a", None).await;
    let b = text_block(&*repo, "b", None).await;
    let c = text_block(&*repo, "c", None).await;
    let ab = relate(&*repo, a.id, b.id, "next").await;
    let bc = relate(&*repo, b.id, c.id, "next").await;
    let ca = relate(&*repo, c.id, a.id, "next").await;

    let reachable = traverse(&*repo, a.id, 10, false).await.unwrap();
    assert_eq!(reachable.blocks, ids(&[a.id, b.id, c.id]));
    assert_eq!(
        reachable.relations,
        [ab.id, bc.id, ca.id].into_iter().collect::<BTreeSet<RelationId>>()
    );

    // The start stays excluded even though the cycle reaches it again
    let reachable = traverse(&*repo, a.id, 10, true).await.unwrap();
    assert_eq!(reachable.blocks, ids(&[b.id, c.id]));
}

#[tokio::test]
async fn test_traverse_depth_boundaries() {
    let repo = repository().await;
    let a = text_block(&*repo, "a", None).await;
    let b = text_block(&*repo, "b", None).await;
    let c = text_block(&*repo, "c", None).await;
    let ab = relate(&*repo, a.id, b.id, "next").await;
    relate(&*repo, b.id, c.id, "next").await;

    let depth0 = traverse(&*repo, a.id, 0, false).await.unwrap();
    assert_eq!(depth0.blocks, ids(&[a.id, b.id]));
    assert_eq!(depth0.relations, [ab.id].into_iter().collect::<BTreeSet<_>>());

    let depth0_excluded = traverse(&*repo, a.id, 0, true).await.unwrap();
    assert_eq!(depth0_excluded.blocks, ids(&[b.id]));

    let depth1 = traverse(&*repo, a.id, 1, false).await.unwrap();
    assert_eq!(depth1.blocks, ids(&[a.id, b.id, c.id]));
    assert_eq!(depth1.relations.len(), 2);
}

#[tokio::test]
async fn test_traverse_follows_outgoing_only() {
    let repo = repository().await;
    let a = text_block(&*repo, "a", None).await;
    let b = text_block(&*repo, "b", None).await;
    relate(&*repo, a.id, b.id, "next").await;

    let reachable = traverse(&*repo, b.id, 5, true).await.unwrap();
    assert!(reachable.is_empty());
}

#[tokio::test]
async fn test_traverse_depth_zero_from_leaf() {
    let repo = repository().await;
    let a = text_block(&*repo, "a", None).await;
    let b = text_block(&*repo, "b", None).await;
    relate(&*repo, a.id, b.id, "next").await;

    let included = traverse(&*repo, b.id, 0, false).await.unwrap();
    assert_eq!(included.blocks, ids(&[b.id]));
    assert!(included.relations.is_empty());

    let excluded = traverse(&*repo, b.id, 0, true).await.unwrap();
    assert!(excluded.is_empty());
}

/// Store whose `hidden` block has vanished while relations still point at it
struct DanglingTarget {
    inner: Arc<SqliteGraphRepository>,
    hidden: BlockId,
}

#[async_trait]
impl GraphRepository for DanglingTarget {
    async fn begin_batch(&self) -> Result<Box<dyn GraphBatch>> {
        self.inner.begin_batch().await
    }

    async fn update_block_embedding(&self, id: BlockId, embedding: &[f32]) -> Result<()> {
        self.inner.update_block_embedding(id, embedding).await
    }

    async fn save_storage(&self, storage: &Storage) -> Result<()> {
        self.inner.save_storage(storage).await
    }

    async fn get_block(&self, id: BlockId) -> Result<Option<Block>> {
        if id == self.hidden {
            return Ok(None);
        }
        self.inner.get_block(id).await
    }

    async fn get_relation(&self, id: RelationId) -> Result<Option<Relation>> {
        self.inner.get_relation(id).await
    }

    async fn list_outgoing(&self, block: BlockId) -> Result<Vec<Relation>> {
        self.inner.list_outgoing(block).await
    }

    async fn list_incoming(&self, block: BlockId) -> Result<Vec<Relation>> {
        self.inner.list_incoming(block).await
    }

    async fn find_outgoing_by_label(&self, block: BlockId, label: &str) -> Result<Vec<Relation>> {
        self.inner.find_outgoing_by_label(block, label).await
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>> {
        self.inner.recent_blocks(limit).await
    }

    async fn list_embeddings(&self, kind: EntityKind) -> Result<Vec<(i64, Vec<f32>)>> {
        self.inner.list_embeddings(kind).await
    }

    async fn get_storage(&self, name: &str) -> Result<Option<Storage>> {
        self.inner.get_storage(name).await
    }

    async fn get_stats(&self) -> Result<GraphStats> {
        self.inner.get_stats().await
    }
}

#[tokio::test]
async fn test_traverse_skips_relation_to_missing_block() {
    let repo = repository().await;
    let a = text_block(&*repo, "a", None).await;
    let gone = text_block(&*repo, "gone", None).await;
    let c = text_block(&*repo, "c", None).await;
    relate(&*repo, a.id, gone.id, "next").await;
    relate(&*repo, gone.id, c.id, "next").await;
    let ac = relate(&*repo, a.id, c.id, "also").await;

    let store = DanglingTarget {
        inner: repo.clone(),
        hidden: gone.id,
    };
    let reachable = traverse(&store, a.id, 5, true).await.unwrap();

    assert_eq!(reachable.blocks, ids(&[c.id]));
    assert_eq!(reachable.relations, [ac.id].into_iter().collect::<BTreeSet<_>>());
}

#[tokio::test]
async fn test_traverse_missing_start() {
    let repo = repository().await;
    let err = traverse(&*repo, BlockId(42), 2, false).await.unwrap_err();
    assert!(matches!(err, Error::EntityNotFound { id: 42, .. }));
}

// ========== Similarity ==========

#[tokio::test]
async fn test_nearest_excludes_query_and_applies_threshold() {
    let repo = repository().await;
    let query = text_block(&*repo, "cat", Some(&[1.0, 0.0, 0.0])).await;
    let close = text_block(&*repo, "kitten", Some(&[0.9, 0.1, 0.0])).await;
    let far = text_block(&*repo, "tax law", Some(&[0.0, 0.0, 1.0])).await;
    let twin = text_block(&*repo, "feline", Some(&[1.0, 0.0, 0.0])).await;
    text_block(&*repo, "no vector", None).await;

    let results = nearest(&*repo, query.id, EntityKind::Block, 10, 0.5)
        .await
        .unwrap();
    let found: Vec<i64> = results.iter().map(|r| r.entity.id()).collect();
    assert_eq!(found, vec![twin.id.0, close.id.0]);
    assert!(results[0].similarity >= results[1].similarity);
    assert!(!found.contains(&far.id.0));
    assert!(!found.contains(&query.id.0));

    let top1 = nearest(&*repo, query.id, EntityKind::Block, 1, -1.0)
        .await
        .unwrap();
    assert_eq!(top1.len(), 1);
    assert_eq!(top1[0].entity.id(), twin.id.0);

    assert!(
        nearest(&*repo, query.id, EntityKind::Block, 0, -1.0)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_nearest_ties_keep_lower_id_first() {
    let repo = repository().await;
    let query = text_block(&*repo, "q", Some(&[0.0, 1.0, 0.0])).await;
    let first = text_block(&*repo, "x", Some(&[0.0, 2.0, 0.0])).await;
    let second = text_block(&*repo, "y", Some(&[0.0, 3.0, 0.0])).await;

    let results = nearest(&*repo, query.id, EntityKind::Block, 2, 0.0)
        .await
        .unwrap();
    assert_eq!(results[0].entity.id(), first.id.0);
    assert_eq!(results[1].entity.id(), second.id.0);
}

#[tokio::test]
async fn test_nearest_relations() {
    let repo = repository().await;
    let query = text_block(&*repo, "q", Some(&[1.0, 0.0, 0.0])).await;
    let other = text_block(&*repo, "o", None).await;

    let mut batch = repo.begin_batch().await.unwrap();
    let rel = batch
        .create_relation(
            &NewRelation::new(query.id, other.id, "likes"),
            Some(&[1.0, 0.0, 0.0]),
        )
        .await
        .unwrap();
    batch.commit().await.unwrap();

    let results = nearest(&*repo, query.id, EntityKind::Relation, 5, 0.9)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity.id(), rel.id.0);
    assert!(results[0].entity.as_relation().is_some());
}

#[tokio::test]
async fn test_nearest_errors() {
    let repo = repository().await;
    let bare = text_block(&*repo, "bare", None).await;

    let err = nearest(&*repo, bare.id, EntityKind::Block, 3, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmbeddingMissing(id) if id == bare.id.0));

    let err = nearest(&*repo, BlockId(77), EntityKind::Block, 3, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EntityNotFound { id: 77, .. }));
}

#[tokio::test]
async fn test_nearest_skips_dimension_mismatch() {
    let repo = repository().await;
    text_block(&*repo, "short", Some(&[1.0, 0.0])).await;
    let same = text_block(&*repo, "long", Some(&[1.0, 0.0, 0.0])).await;

    let results = nearest_to_embedding(&*repo, &[1.0, 0.0, 0.0], EntityKind::Block, 5, -1.0, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity.id(), same.id.0);
}

// ========== Agentic search ==========

async fn animal_graph() -> (
    std::sync::Arc<inkcre_core::infrastructure::SqliteGraphRepository>,
    BlockId,
    BlockId,
) {
    let repo = repository().await;
    let animals = text_block(&*repo, "animals", Some(&[1.0, 0.0, 0.0])).await;
    let cat = text_block(&*repo, "cat", Some(&[0.9, 0.1, 0.0])).await;
    relate(&*repo, animals.id, cat.id, "member").await;
    (repo, animals.id, cat.id)
}

fn agent(ctx: GraphContext) -> AgenticSearch {
    AgenticSearch::new(ctx, ResolverRegistry::with_builtins())
}

#[tokio::test]
async fn test_agentic_notfound_in_one_step() {
    let (repo, start, _) = animal_graph().await;
    let chat = ScriptedChat::new(["NOTFOUND:no vehicles here."]);
    let ctx = GraphContext::new(repo).with_chat(chat.clone());

    let outcome = agent(ctx)
        .search(start, "a red car", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, SearchState::NotFound("no vehicles here".to_string()));
    assert_eq!(outcome.steps, 1);
    assert_eq!(chat.calls(), 1);

    let prompt = chat.last_user_text(0);
    assert!(prompt.contains("<requirement>\na red car\n</requirement>"));
    assert!(prompt.contains("cat"));
    assert!(prompt.contains("member"));
}

#[tokio::test]
async fn test_agentic_follow_then_found() {
    let (repo, start, cat) = animal_graph().await;
    let chat = ScriptedChat::new([format!("FOLLOW:{}.", cat), format!("FOUND:[{}].", cat)]);
    let ctx = GraphContext::new(repo).with_chat(chat.clone());

    let outcome = agent(ctx)
        .search(start, "a pet", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, SearchState::Found(vec![cat]));
    assert_eq!(outcome.found(), Some(&[cat][..]));
    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.path, vec![start, cat]);

    // cat has no outgoing relations, so the view falls back to incoming ones
    assert!(chat.last_user_text(1).contains("no outgoing relations"));
}

#[tokio::test]
async fn test_agentic_step_bound() {
    let (repo, start, _) = animal_graph().await;
    let chat = ScriptedChat::repeating(format!("FOLLOW:{}.", start));
    let ctx = GraphContext::new(repo).with_chat(chat.clone());

    let outcome = agent(ctx)
        .with_max_steps(3)
        .search(start, "anything", &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome.state, SearchState::NotFound(ref reason) if reason.contains("step limit")));
    assert_eq!(outcome.steps, 3);
    assert_eq!(chat.calls(), 3);
    assert!(chat.last_user_text(1).contains("visited"));
}

#[tokio::test]
async fn test_agentic_follow_to_missing_block_stays_put() {
    let (repo, start, _) = animal_graph().await;
    let chat = ScriptedChat::new(["FOLLOW:999.", "NOTFOUND:gave up."]);
    let ctx = GraphContext::new(repo).with_chat(chat.clone());

    let outcome = agent(ctx)
        .search(start, "x", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.path, vec![start]);
    assert!(chat.last_user_text(1).contains("Block 999 does not exist"));
}

#[tokio::test]
async fn test_agentic_protocol_violation() {
    let (repo, start, _) = animal_graph().await;
    let chat = ScriptedChat::new(["I would look at the cat"]);
    let ctx = GraphContext::new(repo).with_chat(chat);

    let err = agent(ctx)
        .search(start, "x", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AgentProtocolViolation { reply } if reply == "I would look at the cat"));
}

#[tokio::test]
async fn test_agentic_cancelled() {
    let (repo, start, _) = animal_graph().await;
    let chat = ScriptedChat::repeating("NOTFOUND:x.");
    let ctx = GraphContext::new(repo).with_chat(chat.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = agent(ctx).search(start, "x", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(chat.calls(), 0);
}

#[tokio::test]
async fn test_agentic_missing_start_and_missing_chat() {
    let (repo, start, _) = animal_graph().await;

    let ctx = GraphContext::new(repo.clone()).with_chat(ScriptedChat::repeating("NOTFOUND:x."));
    let err = agent(ctx)
        .search(BlockId(404), "x", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EntityNotFound { id: 404, .. }));

    let err = agent(GraphContext::new(repo))
        .search(start, "x", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
}

#[tokio::test]
async fn test_agentic_search_from_query_starts_at_nearest() {
    let (repo, animals, cat) = animal_graph().await;
    let query = text_block(&*repo, "kitty", Some(&[0.85, 0.15, 0.0])).await;

    let chat = ScriptedChat::new([format!("FOUND:[{}].", cat)]);
    let ctx = GraphContext::new(repo).with_chat(chat.clone());

    let outcome = agent(ctx)
        .search_from_query(query.id, "a pet", &CancellationToken::new())
        .await
        .unwrap();

    // cat is closer to the query than animals
    assert_eq!(outcome.path, vec![cat]);
    assert_ne!(outcome.path[0], animals);
    assert_eq!(outcome.state, SearchState::Found(vec![cat]));

    let prompt = chat.last_user_text(0);
    assert!(prompt.contains("- a pet\n- kitty"));
}

#[tokio::test]
async fn test_agentic_search_from_query_without_candidates() {
    let repo = repository().await;
    let query = text_block(&*repo, "alone", Some(&[1.0, 0.0, 0.0])).await;
    let chat = ScriptedChat::repeating("NOTFOUND:x.");
    let ctx = GraphContext::new(repo).with_chat(chat.clone());

    let outcome = agent(ctx)
        .search_from_query(query.id, "anything", &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome.state, SearchState::NotFound(_)));
    assert_eq!(outcome.steps, 0);
    assert_eq!(chat.calls(), 0);
}

// ========== Pick ==========

#[tokio::test]
async fn test_pick_blocks_filters_to_presented() {
    let (repo, animals, cat) = animal_graph().await;
    let rel = repo.list_outgoing(animals).await.unwrap()[0].id;

    let chat = ScriptedChat::new([format!("```json\n[{}, 12345]\n```", cat)]);
    let ctx = GraphContext::new(repo).with_chat(chat.clone());

    let picked = inkcre_core::domain::pick::pick_blocks(
        &ctx,
        &[animals, cat],
        &[rel],
        &["a small pet".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(picked, vec![cat]);
    let prompt = chat.last_user_text(0);
    assert!(prompt.contains("id,content"));
    assert!(prompt.contains(&format!("{},{},{},member", rel, animals, cat)));
    assert!(prompt.contains("- a small pet"));
}

#[tokio::test]
async fn test_pick_blocks_rejects_empty_requirements_and_prose() {
    let (repo, animals, _) = animal_graph().await;

    let ctx = GraphContext::new(repo.clone()).with_chat(ScriptedChat::repeating("[1]"));
    let err = inkcre_core::domain::pick::pick_blocks(&ctx, &[animals], &[], &[" ".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let ctx = GraphContext::new(repo).with_chat(ScriptedChat::repeating("the first one"));
    let err = inkcre_core::domain::pick::pick_blocks(&ctx, &[animals], &[], &["x".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AgentProtocolViolation { .. }));
}
