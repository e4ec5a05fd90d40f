use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::pipeline::GenerationFailure;

pub const GREETING: &str =
    "Hello! I can answer questions about the document. What would you like to know?";
pub const THINKING_PLACEHOLDER: &str = "Thinking...";
pub const FAILURE_REPLY: &str =
    "Sorry, I ran into a problem while answering that question. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(
        &self,
        question: &str,
        grounding: &str,
        history: &[ChatMessage],
    ) -> Result<String, GenerationFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Greeting,
    Message,
    Placeholder,
}

#[derive(Debug, Clone)]
struct Entry {
    kind: EntryKind,
    message: ChatMessage,
}

/// A question accepted by [`ChatContext::begin`], with the history to send
/// alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    pub question: String,
    pub history: Vec<ChatMessage>,
}

/// Conversation state for grounded Q&A. While an answer is outstanding a
/// placeholder entry is shown; it disappears when the answer settles.
#[derive(Debug, Clone)]
pub struct ChatContext {
    entries: Vec<Entry>,
}

impl Default for ChatContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatContext {
    pub fn new() -> Self {
        Self {
            entries: vec![Entry {
                kind: EntryKind::Greeting,
                message: ChatMessage::new(Role::Assistant, GREETING),
            }],
        }
    }

    /// Everything to display, placeholder included.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> + '_ {
        self.entries.iter().map(|entry| &entry.message)
    }

    /// Settled conversation turns, without the greeting or placeholder.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::Message)
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn is_pending(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.kind == EntryKind::Placeholder)
    }

    /// Records the question and shows the placeholder. Returns `None` for a
    /// blank question or while another answer is outstanding.
    pub fn begin(&mut self, question: &str) -> Option<PendingQuestion> {
        let question = question.trim();
        if question.is_empty() || self.is_pending() {
            return None;
        }
        let history = self.history();
        self.entries.push(Entry {
            kind: EntryKind::Message,
            message: ChatMessage::new(Role::User, question),
        });
        self.entries.push(Entry {
            kind: EntryKind::Placeholder,
            message: ChatMessage::new(Role::Assistant, THINKING_PLACEHOLDER),
        });
        Some(PendingQuestion {
            question: question.to_string(),
            history,
        })
    }

    /// Replaces the placeholder with the answer, or with an apology when the
    /// answer failed.
    pub fn settle(&mut self, result: Result<String, GenerationFailure>) -> &ChatMessage {
        self.entries
            .retain(|entry| entry.kind != EntryKind::Placeholder);
        let content = match result {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "question could not be answered");
                FAILURE_REPLY.to_string()
            }
        };
        self.entries.push(Entry {
            kind: EntryKind::Message,
            message: ChatMessage::new(Role::Assistant, content),
        });
        &self.entries[self.entries.len() - 1].message
    }

    #[instrument(skip_all)]
    pub async fn ask(
        &mut self,
        answerer: &dyn Answerer,
        grounding: &str,
        question: &str,
        timeout: Duration,
    ) -> Option<&ChatMessage> {
        let pending = self.begin(question)?;
        let result = match tokio::time::timeout(
            timeout,
            answerer.answer(&pending.question, grounding, &pending.history),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationFailure::Timeout(timeout)),
        };
        Some(self.settle(result))
    }
}
