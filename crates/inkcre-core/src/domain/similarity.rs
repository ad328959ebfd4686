//! Nearest-neighbour search over stored embeddings

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::graph::{BlockId, EntityKind, GraphRepository, ScoredEntity};

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// The `k` entities of `kind` closest to block `query`, closest first
///
/// The query block itself is never part of the result.
pub async fn nearest(
    repository: &dyn GraphRepository,
    query: BlockId,
    kind: EntityKind,
    k: usize,
    min_similarity: f32,
) -> Result<Vec<ScoredEntity>> {
    let block = repository
        .get_block(query)
        .await?
        .ok_or_else(|| Error::block_not_found(query))?;
    let embedding = block.embedding.ok_or(Error::EmbeddingMissing(query.0))?;

    let exclude = (kind == EntityKind::Block).then_some(query.0);
    nearest_to_embedding(repository, &embedding, kind, k, min_similarity, exclude).await
}

/// The `k` entities of `kind` closest to `embedding`, closest first
///
/// Entities without an embedding, with a different dimension, below
/// `min_similarity`, or with id `exclude` are left out. Ties keep the
/// lower id first.
pub async fn nearest_to_embedding(
    repository: &dyn GraphRepository,
    embedding: &[f32],
    kind: EntityKind,
    k: usize,
    min_similarity: f32,
    exclude: Option<i64>,
) -> Result<Vec<ScoredEntity>> {
    if k == 0 {
        return Ok(Vec::new());
    }

    let mut scored: Vec<(i64, f32)> = repository
        .list_embeddings(kind)
        .await?
        .into_iter()
        .filter(|(id, candidate)| Some(*id) != exclude && candidate.len() == embedding.len())
        .map(|(id, candidate)| (id, cosine_similarity(embedding, &candidate)))
        .filter(|(_, similarity)| *similarity >= min_similarity)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(k);

    let mut results = Vec::with_capacity(scored.len());
    for (id, similarity) in scored {
        match repository.get_entity(kind, id).await? {
            Some(entity) => results.push(ScoredEntity { entity, similarity }),
            None => warn!(kind = %kind, id, "Embedded entity vanished during search"),
        }
    }

    debug!(kind = %kind, k, min_similarity, found = results.len(), "Similarity search");

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
