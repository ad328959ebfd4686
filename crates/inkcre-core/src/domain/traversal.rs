//! Bounded reachability over outgoing relations

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::graph::{BlockId, GraphRepository, RelationId};

/// Blocks and relations reachable from a start block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reachable {
    pub blocks: BTreeSet<BlockId>,
    pub relations: BTreeSet<RelationId>,
}

impl Reachable {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.relations.is_empty()
    }
}

/// Breadth-first traversal from `start`
///
/// The start block sits at level 0. A block at level `L` has its outgoing
/// relations expanded iff `L <= max_depth` and it was not expanded before,
/// so `max_depth = 0` yields the direct successors of `start`. Every
/// followed relation contributes itself and its target. Relations whose
/// target block is missing are skipped.
pub async fn traverse(
    repository: &dyn GraphRepository,
    start: BlockId,
    max_depth: usize,
    exclude_start: bool,
) -> Result<Reachable> {
    if repository.get_block(start).await?.is_none() {
        return Err(Error::block_not_found(start));
    }

    let mut reachable = Reachable::default();
    reachable.blocks.insert(start);

    let mut expanded: HashSet<BlockId> = HashSet::new();
    let mut exists: HashMap<BlockId, bool> = HashMap::from([(start, true)]);
    let mut worklist: VecDeque<(BlockId, usize)> = VecDeque::from([(start, 0)]);

    while let Some((block, level)) = worklist.pop_front() {
        if level > max_depth || !expanded.insert(block) {
            continue;
        }

        for relation in repository.list_outgoing(block).await? {
            let target = relation.to;
            let target_exists = match exists.get(&target) {
                Some(known) => *known,
                None => {
                    let found = repository.get_block(target).await?.is_some();
                    exists.insert(target, found);
                    found
                }
            };

            if !target_exists {
                warn!(
                    relation_id = %relation.id,
                    from = %block,
                    to = %target,
                    "Skipping relation to missing block"
                );
                continue;
            }

            reachable.relations.insert(relation.id);
            if reachable.blocks.insert(target) {
                worklist.push_back((target, level + 1));
            }
        }
    }

    if exclude_start {
        reachable.blocks.remove(&start);
    }

    debug!(
        start = %start,
        max_depth,
        blocks = reachable.blocks.len(),
        relations = reachable.relations.len(),
        "Traversal finished"
    );

    Ok(reachable)
}
