//! Domain layer: the block graph engine
//!
//! - [`graph`]: entity model and the ports to external collaborators
//! - [`resolver`]: stepwise extraction protocol and built-in resolvers
//! - [`organize`]: drives a resolver to completion and commits atomically
//! - [`traversal`], [`similarity`], [`agentic`], [`pick`]: read-side queries
//! - [`service`]: facade used by the CLI

pub mod agentic;
pub mod context;
pub mod graph;
pub mod organize;
pub mod pick;
mod prompt;
pub mod resolver;
pub mod service;
pub mod similarity;
pub mod traversal;

pub use agentic::{AgentCommand, AgenticSearch, SearchOutcome, SearchState, parse_command};
pub use context::GraphContext;
pub use organize::{OrganizeOutcome, Organizer};
pub use service::{GraphService, ServiceSettings};
pub use traversal::{Reachable, traverse};
