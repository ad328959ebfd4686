//! LLM-driven exploration of the block graph
//!
//! The agent sees one block's neighbourhood at a time and answers with one
//! of three commands. The search is a small state machine:
//!
//! ```text
//! EXPLORING(block) --FOLLOW:id--> EXPLORING(id)
//! EXPLORING(block) --FOUND:[..]--> FOUND(ids)
//! EXPLORING(block) --NOTFOUND:r--> NOTFOUND(r)
//! ```
//!
//! Exploration is bounded by a step limit; conversation history is kept
//! across steps.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::llm::ChatSession;

use super::context::GraphContext;
use super::graph::{Block, BlockId, EntityKind, Relation};
use super::prompt::{AGENT_INSTRUCTIONS, AGENT_REMINDER, csv_table, strip_fence};
use super::resolver::ResolverRegistry;
use super::similarity;

/// Default bound on agent turns
pub const DEFAULT_MAX_STEPS: usize = 16;

/// Number of nearest blocks considered when picking a start from a query
const START_CANDIDATES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchState {
    Exploring(BlockId),
    Found(Vec<BlockId>),
    NotFound(String),
}

impl SearchState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchState::Exploring(_))
    }
}

/// A parsed agent reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    Follow(BlockId),
    Found(Vec<BlockId>),
    NotFound(String),
}

/// Parse one agent reply
///
/// Surrounding backticks and whitespace are ignored. The reply splits at
/// the first `:` and the parameter ends at the first `.`. Commands are
/// case-sensitive.
pub fn parse_command(reply: &str) -> Result<AgentCommand> {
    let violation = || Error::AgentProtocolViolation {
        reply: reply.to_string(),
    };

    // The whole reply is the command; prose around it is a violation
    let (command, param) = strip_fence(reply).split_once(':').ok_or_else(violation)?;
    let param = param.split_once('.').map_or(param, |(head, _)| head).trim();

    match command {
        "FOLLOW" => param
            .parse::<i64>()
            .map(|id| AgentCommand::Follow(BlockId(id)))
            .map_err(|_| violation()),
        "FOUND" => serde_json::from_str::<Vec<i64>>(param)
            .map(|ids| AgentCommand::Found(ids.into_iter().map(BlockId).collect()))
            .map_err(|_| violation()),
        "NOTFOUND" => Ok(AgentCommand::NotFound(param.to_string())),
        _ => Err(violation()),
    }
}

/// Terminal result of a search
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub state: SearchState,
    /// Agent turns taken
    pub steps: usize,
    /// Blocks the view rested on, in order, start included
    pub path: Vec<BlockId>,
}

impl SearchOutcome {
    pub fn found(&self) -> Option<&[BlockId]> {
        match &self.state {
            SearchState::Found(ids) => Some(ids),
            _ => None,
        }
    }
}

/// Runs agentic searches against the graph
#[derive(Debug, Clone)]
pub struct AgenticSearch {
    ctx: GraphContext,
    registry: ResolverRegistry,
    max_steps: usize,
}

impl AgenticSearch {
    pub fn new(ctx: GraphContext, registry: ResolverRegistry) -> Self {
        Self {
            ctx,
            registry,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Explore from `start` until the agent finds blocks for `requirement`
    pub async fn search(
        &self,
        start: BlockId,
        requirement: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome> {
        let repository = self.ctx.repository();
        if repository.get_block(start).await?.is_none() {
            return Err(Error::block_not_found(start));
        }

        let chat = Arc::clone(self.ctx.require_chat()?);
        let instructions = format!(
            "{}\n<requirement>\n{}\n</requirement>",
            AGENT_INSTRUCTIONS, requirement
        );
        let mut session = ChatSession::new(chat, instructions);

        let mut state = SearchState::Exploring(start);
        let mut visited: HashSet<BlockId> = HashSet::from([start]);
        let mut path = vec![start];
        let mut notice: Option<String> = None;
        let mut steps = 0;

        info!(start = %start, max_steps = self.max_steps, "Starting agentic search");

        while let SearchState::Exploring(current) = state {
            if steps >= self.max_steps {
                warn!(start = %start, steps, "Agentic search hit the step limit");
                state = SearchState::NotFound(format!(
                    "step limit of {} reached without a result",
                    self.max_steps
                ));
                break;
            }
            steps += 1;

            let mut prompt = notice.take().map(|n| format!("{}\n", n)).unwrap_or_default();
            prompt.push_str(&self.neighbor_view(current).await?);
            prompt.push_str(AGENT_REMINDER);

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                reply = session.send(prompt) => reply?,
            };

            let command = parse_command(&reply)?;
            debug!(step = steps, current = %current, ?command, "Agent replied");

            state = match command {
                AgentCommand::Follow(next) => {
                    if repository.get_block(next).await?.is_none() {
                        warn!(current = %current, target = %next, "Agent followed a missing block");
                        notice = Some(format!(
                            "Block {} does not exist. The view stays on block {}.",
                            next, current
                        ));
                        SearchState::Exploring(current)
                    } else {
                        if !visited.insert(next) {
                            notice = Some(format!("You have visited block {} before.", next));
                        }
                        path.push(next);
                        SearchState::Exploring(next)
                    }
                }
                AgentCommand::Found(ids) => SearchState::Found(ids),
                AgentCommand::NotFound(reason) => SearchState::NotFound(reason),
            };
        }

        info!(start = %start, steps, state = ?state, "Agentic search finished");

        Ok(SearchOutcome { state, steps, path })
    }

    /// Search starting from the block nearest to `query`
    ///
    /// The query block's description is added to the requirement.
    pub async fn search_from_query(
        &self,
        query: BlockId,
        requirement: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome> {
        let repository = self.ctx.repository();
        let query_block = repository
            .get_block(query)
            .await?
            .ok_or_else(|| Error::block_not_found(query))?;

        let candidates = similarity::nearest(
            repository.as_ref(),
            query,
            EntityKind::Block,
            START_CANDIDATES,
            -1.0,
        )
        .await?;

        let Some(start) = candidates.first().and_then(|scored| scored.entity.block_id()) else {
            return Ok(SearchOutcome {
                state: SearchState::NotFound("no embedded block to start from".to_string()),
                steps: 0,
                path: Vec::new(),
            });
        };

        let description = self.describe_or_placeholder(&query_block).await;
        let requirement = format!("- {}\n- {}", requirement, description);

        self.search(start, &requirement, cancel).await
    }

    /// Outgoing relations of `block`, or incoming ones when it has none
    async fn neighbor_view(&self, block: BlockId) -> Result<String> {
        let repository = self.ctx.repository();
        let mut view = String::from("<local view>\n");

        let outgoing = repository.list_outgoing(block).await?;
        if !outgoing.is_empty() {
            view.push_str(&format!(
                "Outgoing relations of the current block {}:\n",
                block
            ));
            let rows = self.rows(&outgoing, |r| r.to).await?;
            view.push_str(&csv_table(
                "relation_id,target is the current block's,target_id,target_content",
                rows,
            ));
        } else {
            let incoming = repository.list_incoming(block).await?;
            view.push_str(&format!(
                "The current block {} has no outgoing relations. Incoming relations:\n",
                block
            ));
            let rows = self.rows(&incoming, |r| r.from).await?;
            view.push_str(&csv_table(
                "relation_id,current block is the source's,source_id,source_content",
                rows,
            ));
        }

        view.push_str("</local view>\n");
        Ok(view)
    }

    async fn rows(
        &self,
        relations: &[Relation],
        neighbor: impl Fn(&Relation) -> BlockId,
    ) -> Result<Vec<Vec<String>>> {
        let mut rows = Vec::with_capacity(relations.len());
        for relation in relations {
            let id = neighbor(relation);
            let Some(block) = self.ctx.repository().get_block(id).await? else {
                warn!(relation_id = %relation.id, block_id = %id, "Skipping relation to missing block");
                continue;
            };
            rows.push(vec![
                relation.id.to_string(),
                relation.content.clone(),
                id.to_string(),
                self.describe_or_placeholder(&block).await,
            ]);
        }
        Ok(rows)
    }

    async fn describe_or_placeholder(&self, block: &Block) -> String {
        match self.registry.describe(&self.ctx, block).await {
            Ok(text) => text,
            Err(e) => {
                warn!(block_id = %block.id, error = %e, "Could not describe block");
                format!("(unavailable {} block)", block.kind)
            }
        }
    }
}
