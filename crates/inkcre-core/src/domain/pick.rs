//! Let the chat model choose blocks from a presented subgraph

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::Message;

use super::context::GraphContext;
use super::graph::{BlockId, RelationId};
use super::prompt::{PICK_INSTRUCTIONS, csv_table, strip_fence};

/// Ask the chat model which of `blocks` best satisfy `requirements`
///
/// Returned ids are limited to the presented blocks, in the model's order.
pub async fn pick_blocks(
    ctx: &GraphContext,
    blocks: &[BlockId],
    relations: &[RelationId],
    requirements: &[String],
) -> Result<Vec<BlockId>> {
    let requirements: Vec<&str> = requirements
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .collect();
    if requirements.is_empty() {
        return Err(Error::InvalidInput(
            "pick needs at least one requirement".to_string(),
        ));
    }

    let chat = ctx.require_chat()?;
    let repository = ctx.repository();

    let mut block_rows = Vec::with_capacity(blocks.len());
    let mut presented = HashSet::new();
    for &id in blocks {
        match repository.get_block(id).await? {
            Some(block) => {
                presented.insert(block.id);
                block_rows.push(vec![block.id.to_string(), block.content]);
            }
            None => warn!(block_id = %id, "Pick skips missing block"),
        }
    }

    let mut relation_rows = Vec::with_capacity(relations.len());
    for &id in relations {
        match repository.get_relation(id).await? {
            Some(relation) => relation_rows.push(vec![
                relation.id.to_string(),
                relation.from.to_string(),
                relation.to.to_string(),
                relation.content,
            ]),
            None => warn!(relation_id = %id, "Pick skips missing relation"),
        }
    }

    let prompt = format!(
        "{}\n## Blocks\n{}## Relations\n{}## Requirements\n- {}",
        PICK_INSTRUCTIONS,
        csv_table("id,content", block_rows),
        csv_table("id,from,to,content", relation_rows),
        requirements.join("\n- ")
    );

    let reply = chat.complete(vec![Message::user(prompt)]).await?;
    let picked = parse_pick(&reply)?;

    debug!(presented = presented.len(), picked = picked.len(), "Pick answered");

    Ok(picked
        .into_iter()
        .filter(|id| {
            let known = presented.contains(id);
            if !known {
                warn!(block_id = %id, "Model picked a block that was not presented");
            }
            known
        })
        .collect())
}

/// Parse a JSON array of block ids, optionally fenced
pub fn parse_pick(reply: &str) -> Result<Vec<BlockId>> {
    serde_json::from_str::<Vec<i64>>(strip_fence(reply))
        .map(|ids| ids.into_iter().map(BlockId).collect())
        .map_err(|_| Error::AgentProtocolViolation {
            reply: reply.to_string(),
        })
}
