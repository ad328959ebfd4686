//! Multi-turn chat session over a [`ChatPort`]

use std::sync::Arc;

use crate::domain::graph::ChatPort;
use crate::error::Result;

use super::types::Message;

/// Stateful conversation that accumulates history
///
/// The first user turn is prefixed with the session instructions; every
/// user turn and every assistant reply is kept for the following turns.
pub struct ChatSession {
    chat: Arc<dyn ChatPort>,
    instructions: String,
    history: Vec<Message>,
}

impl ChatSession {
    pub fn new(chat: Arc<dyn ChatPort>, instructions: impl Into<String>) -> Self {
        Self {
            chat,
            instructions: instructions.into(),
            history: Vec::new(),
        }
    }

    /// Send one user turn and return the assistant reply
    pub async fn send(&mut self, content: impl Into<String>) -> Result<String> {
        let content = content.into();
        let turn = if self.history.is_empty() && !self.instructions.is_empty() {
            format!("{}\n\n{}", self.instructions, content)
        } else {
            content
        };

        self.history.push(Message::user(turn));
        let reply = match self.chat.complete(self.history.clone()).await {
            Ok(reply) => reply,
            Err(e) => {
                // keep history aligned: a failed turn is not part of the conversation
                self.history.pop();
                return Err(e);
            }
        };
        self.history.push(Message::assistant(reply.clone()));

        Ok(reply)
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Number of completed exchanges
    pub fn turns(&self) -> usize {
        self.history.len() / 2
    }
}
