//! Chat stream: append-only log of remarks, each bound to the card it was made on.

use chrono::{DateTime, Utc};

use crate::identity::CardId;
use crate::protocol::ChatPayload;

/// Who wrote a message, relative to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub card_id: CardId,
    pub sent_at: DateTime<Utc>,
    pub origin: Origin,
}

impl ChatMessage {
    /// Wire form (origin is implied by who sends it).
    pub fn payload(&self) -> ChatPayload {
        ChatPayload {
            text: self.text.clone(),
            card_id: self.card_id.clone(),
            sent_at: self.sent_at,
        }
    }
}

/// Messages in arrival order at this client. Never reordered, edited or removed while the session lives.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local echo of a message this client is sending. Text is trimmed; blank text is rejected.
    pub fn append_local(
        &mut self,
        text: &str,
        card_id: CardId,
        sent_at: DateTime<Utc>,
    ) -> Result<&ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyText);
        }
        Ok(self.push(ChatMessage {
            text: text.to_owned(),
            card_id,
            sent_at,
            origin: Origin::Local,
        }))
    }

    /// Message received from the peer. No deduplication: the transport never echoes to the sender.
    pub fn append_remote(&mut self, payload: ChatPayload) -> Result<&ChatMessage, ChatError> {
        if payload.text.trim().is_empty() {
            return Err(ChatError::EmptyText);
        }
        Ok(self.push(ChatMessage {
            text: payload.text,
            card_id: payload.card_id,
            sent_at: payload.sent_at,
            origin: Origin::Remote,
        }))
    }

    fn push(&mut self, msg: ChatMessage) -> &ChatMessage {
        self.messages.push(msg);
        &self.messages[self.messages.len() - 1]
    }

    /// Messages about one card, in arrival order.
    pub fn messages_for<'a>(&'a self, card_id: &CardId) -> impl Iterator<Item = &'a ChatMessage> + 'a {
        let card_id = card_id.clone();
        self.messages.iter().filter(move |m| m.card_id == card_id)
    }

    pub fn all(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("message text is empty")]
    EmptyText,
}
