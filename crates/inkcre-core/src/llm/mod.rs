//! Model-provider integration
//!
//! OpenAI-compatible HTTP client plus the multi-turn session used by
//! the agentic search.

pub mod client;
pub mod session;
pub mod types;

pub use client::{LlmClient, LlmClientBuilder};
pub use session::ChatSession;
pub use types::{ContentPart, Message, MessageContent, MessageRole};
