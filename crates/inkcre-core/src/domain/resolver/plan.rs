//! Declarative extraction plans with forward references
//!
//! A plan lists blocks and relations in emission order. Relations name
//! their endpoints as either the source block or an earlier planned block;
//! the real ids are filled in as the driver reports persisted blocks back.

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::trace;

use crate::domain::graph::{BlockId, Draft, Entity, NewBlock, NewRelation};
use crate::error::{Error, Result};

use super::{Extraction, Step};

/// Endpoint of a planned relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The block being organized
    Source,
    /// The n-th block of the plan
    Slot(usize),
}

#[derive(Debug, Clone)]
enum PlannedStep {
    Block {
        slot: usize,
        draft: NewBlock,
    },
    Relation {
        from: Endpoint,
        to: Endpoint,
        label: String,
    },
}

/// Ordered list of drafts to emit for one source block
#[derive(Debug, Clone)]
pub struct ExtractionPlan {
    source: BlockId,
    steps: Vec<PlannedStep>,
    slots: usize,
}

impl ExtractionPlan {
    pub fn new(source: BlockId) -> Self {
        Self {
            source,
            steps: Vec::new(),
            slots: 0,
        }
    }

    /// Plan a block and get a handle to relate it later
    pub fn block(&mut self, draft: NewBlock) -> Endpoint {
        let slot = self.slots;
        self.slots += 1;
        self.steps.push(PlannedStep::Block { slot, draft });
        Endpoint::Slot(slot)
    }

    /// Plan a relation between the source or already planned blocks
    pub fn relate(&mut self, from: Endpoint, to: Endpoint, label: impl Into<String>) {
        self.steps.push(PlannedStep::Relation {
            from,
            to,
            label: label.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_extraction(self) -> PlannedExtraction {
        PlannedExtraction {
            source: self.source,
            steps: self.steps.into(),
            resolved: vec![None; self.slots],
            awaiting: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Awaiting {
    Block(usize),
    Relation,
}

/// Step iterator over an [`ExtractionPlan`]
#[derive(Debug)]
pub struct PlannedExtraction {
    source: BlockId,
    steps: VecDeque<PlannedStep>,
    resolved: Vec<Option<BlockId>>,
    awaiting: Option<Awaiting>,
}

impl PlannedExtraction {
    fn accept(&mut self, prior: Option<Entity>) -> Result<()> {
        match (self.awaiting.take(), prior) {
            (None, None) => Ok(()),
            (None, Some(entity)) => Err(protocol(format!(
                "received {} {} without a pending draft",
                entity.kind(),
                entity.id()
            ))),
            (Some(_), None) => Err(protocol(
                "persisted form of the previous draft was not returned".to_string(),
            )),
            (Some(Awaiting::Block(slot)), Some(Entity::Block(block))) => {
                self.resolved[slot] = Some(block.id);
                Ok(())
            }
            (Some(Awaiting::Relation), Some(Entity::Relation(_))) => Ok(()),
            (Some(expected), Some(entity)) => Err(protocol(format!(
                "expected a persisted {:?}, got {} {}",
                expected,
                entity.kind(),
                entity.id()
            ))),
        }
    }

    fn endpoint(&self, endpoint: Endpoint) -> Result<BlockId> {
        match endpoint {
            Endpoint::Source => Ok(self.source),
            Endpoint::Slot(slot) => self
                .resolved
                .get(slot)
                .copied()
                .flatten()
                .ok_or_else(|| protocol(format!("relation references unpersisted slot {}", slot))),
        }
    }
}

#[async_trait]
impl Extraction for PlannedExtraction {
    async fn next(&mut self, prior: Option<Entity>) -> Result<Step> {
        self.accept(prior)?;

        let Some(step) = self.steps.pop_front() else {
            return Ok(Step::Done);
        };

        match step {
            PlannedStep::Block { slot, draft } => {
                trace!(source = %self.source, slot, "Emitting planned block");
                self.awaiting = Some(Awaiting::Block(slot));
                Ok(Step::Pending(Draft::Block(draft)))
            }
            PlannedStep::Relation { from, to, label } => {
                let relation = NewRelation::new(self.endpoint(from)?, self.endpoint(to)?, label);
                self.awaiting = Some(Awaiting::Relation);
                Ok(Step::Pending(Draft::Relation(relation)))
            }
        }
    }
}

fn protocol(reason: String) -> Error {
    Error::ExtractionFailed(format!("extraction protocol: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{Block, Relation, RelationId, ResolverKind};
    use chrono::Utc;

    fn persisted_block(id: i64, draft: &NewBlock) -> Entity {
        let now = Utc::now();
        Entity::Block(Block {
            id: BlockId(id),
            kind: draft.kind.clone(),
            content: draft.content.clone(),
            storage: None,
            embedding: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn persisted_relation(id: i64, draft: &NewRelation) -> Entity {
        let now = Utc::now();
        Entity::Relation(Relation {
            id: RelationId(id),
            from: draft.from,
            to: draft.to,
            content: draft.content.clone(),
            embedding: None,
            created_at: now,
            updated_at: now,
        })
    }

    #[tokio::test]
    async fn test_empty_plan_is_done_immediately() {
        let mut extraction = ExtractionPlan::new(BlockId(1)).into_extraction();
        assert_eq!(extraction.next(None).await.unwrap(), Step::Done);
        assert_eq!(extraction.next(None).await.unwrap(), Step::Done);
    }

    #[tokio::test]
    async fn test_forward_reference_uses_assigned_id() {
        let mut plan = ExtractionPlan::new(BlockId(1));
        let summary = plan.block(NewBlock::text("summary"));
        plan.relate(Endpoint::Source, summary, "alt:text");
        let mut extraction = plan.into_extraction();

        let Step::Pending(Draft::Block(draft)) = extraction.next(None).await.unwrap() else {
            panic!("expected a block draft");
        };
        assert_eq!(draft.kind, ResolverKind::TEXT);

        let step = extraction
            .next(Some(persisted_block(77, &draft)))
            .await
            .unwrap();
        let Step::Pending(Draft::Relation(relation)) = step else {
            panic!("expected a relation draft");
        };
        assert_eq!(relation.from, BlockId(1));
        assert_eq!(relation.to, BlockId(77));

        let done = extraction
            .next(Some(persisted_relation(5, &relation)))
            .await
            .unwrap();
        assert_eq!(done, Step::Done);
    }

    #[tokio::test]
    async fn test_missing_prior_is_protocol_error() {
        let mut plan = ExtractionPlan::new(BlockId(1));
        let summary = plan.block(NewBlock::text("summary"));
        plan.relate(Endpoint::Source, summary, "alt:text");
        let mut extraction = plan.into_extraction();

        extraction.next(None).await.unwrap();
        let err = extraction.next(None).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_wrong_entity_kind_is_protocol_error() {
        let mut plan = ExtractionPlan::new(BlockId(1));
        plan.block(NewBlock::text("a"));
        let mut extraction = plan.into_extraction();

        extraction.next(None).await.unwrap();
        let bogus = persisted_relation(1, &NewRelation::new(BlockId(1), BlockId(1), "x"));
        assert!(extraction.next(Some(bogus)).await.is_err());
    }

    #[tokio::test]
    async fn test_unsolicited_prior_is_protocol_error() {
        let mut extraction = ExtractionPlan::new(BlockId(1)).into_extraction();
        let block = persisted_block(2, &NewBlock::text("x"));
        assert!(extraction.next(Some(block)).await.is_err());
    }

    #[tokio::test]
    async fn test_relation_to_later_slot_is_rejected() {
        let mut plan = ExtractionPlan::new(BlockId(1));
        plan.relate(Endpoint::Source, Endpoint::Slot(0), "early");
        plan.block(NewBlock::text("late"));
        let mut extraction = plan.into_extraction();

        assert!(matches!(
            extraction.next(None).await,
            Err(Error::ExtractionFailed(_))
        ));
    }
}
