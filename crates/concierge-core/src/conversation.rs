use std::fmt;

use serde::{Deserialize, Serialize};

use crate::messages::{Message, Role};

/// Append-only message history for one orchestration run.
#[derive(Clone, Debug, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

#[derive(Debug, thiserror::Error)]
#[error("conversation must contain at least one user message")]
pub struct MissingUserMessage;

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Result<Self, MissingUserMessage> {
        if !messages.iter().any(|m| m.role() == Role::User) {
            return Err(MissingUserMessage);
        }
        Ok(Self { messages })
    }

    pub fn from_user_text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user_text(text)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text of the first user message.
    pub fn first_user_text(&self) -> Option<&str> {
        self.messages.iter().find_map(|m| match m {
            Message::User(u) => Some(u.content.as_str()),
            _ => None,
        })
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Why an orchestration run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Answered,
    BudgetExhausted,
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
