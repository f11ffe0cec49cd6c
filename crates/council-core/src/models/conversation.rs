use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;

pub const DEFAULT_TITLE: &str = "New Conversation";

/// Stable in-memory reference to a conversation.
///
/// In-flight turns address their conversation by key, so the external id can
/// be swapped underneath them (temporary to persisted) without the turn
/// losing track of where to write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey(uuid::Uuid);

impl ConversationKey {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConversationKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External conversation id, used for every server call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConversationId {
    /// Client-only id; the server has never seen this conversation
    Temporary(String),
    Persisted(String),
}

impl ConversationId {
    pub fn temporary() -> Self {
        Self::Temporary(format!("temp-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Temporary(id) | Self::Persisted(id) => id,
        }
    }

    pub fn persisted(&self) -> Option<&str> {
        match self {
            Self::Persisted(id) => Some(id),
            Self::Temporary(_) => None,
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable conversation snapshot.
///
/// Snapshots are shared as `Arc<Conversation>`; producing the next one clones
/// the message vector of `Arc<Message>` and replaces only the messages that
/// changed, so readers of an older snapshot are never disturbed.
#[derive(Clone, Debug, PartialEq)]
pub struct Conversation {
    key: ConversationKey,
    id: ConversationId,
    title: String,
    created_at: DateTime<Utc>,
    messages: Vec<Arc<Message>>,
}

impl Conversation {
    /// Fresh, unsaved conversation.
    pub fn temporary() -> Self {
        Self {
            key: ConversationKey::new(),
            id: ConversationId::temporary(),
            title: DEFAULT_TITLE.to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Conversation restored from server detail.
    pub fn persisted(
        id: String,
        title: String,
        created_at: DateTime<Utc>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            key: ConversationKey::new(),
            id: ConversationId::Persisted(id),
            title,
            created_at,
            messages: messages.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        self.key
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.id, ConversationId::Temporary(_))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn last_message(&self) -> Option<&Arc<Message>> {
        self.messages.last()
    }

    pub fn with_title(&self, title: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.title = title.into();
        next
    }

    pub fn with_messages_appended(&self, messages: impl IntoIterator<Item = Message>) -> Self {
        let mut next = self.clone();
        next.messages.extend(messages.into_iter().map(Arc::new));
        next
    }

    /// Next snapshot with the last message replaced by an edited copy.
    /// Returns `None` when the conversation has no messages.
    pub fn with_last_message(&self, edit: impl FnOnce(&mut Message)) -> Option<Self> {
        let last = self.messages.last()?;
        let mut message = Message::clone(last);
        edit(&mut message);

        let mut next = self.clone();
        let idx = next.messages.len() - 1;
        next.messages[idx] = Arc::new(message);
        Some(next)
    }

    /// Swap the external id for the server-issued one. The key, messages and
    /// creation time are carried over untouched.
    pub fn promoted(&self, persisted_id: String, created_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.id = ConversationId::Persisted(persisted_id);
        next.created_at = created_at;
        next
    }
}

/// Full conversation as returned by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl From<ConversationDetail> for Conversation {
    fn from(detail: ConversationDetail) -> Self {
        Conversation::persisted(
            detail.id,
            detail.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            detail.created_at,
            detail.messages,
        )
    }
}
