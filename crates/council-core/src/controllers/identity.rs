use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::models::{Conversation, ConversationSummary};
use crate::repositories::{ApiResult, CouncilApi};
use crate::services::provisional_title;

/// Server-side identity for a conversation that was temporary until now.
#[derive(Clone, Debug, PartialEq)]
pub struct Promotion {
    pub persisted_id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
}

impl Promotion {
    /// Successor of `snapshot` carrying the persisted id and provisional
    /// title. Key and messages are untouched.
    pub fn apply_to(&self, snapshot: &Conversation) -> Conversation {
        snapshot
            .promoted(self.persisted_id.clone(), self.created_at)
            .with_title(self.title.clone())
    }

    /// Sidebar entry for the new conversation. It holds the user message
    /// sent with it.
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.persisted_id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            message_count: 1,
            is_starred: false,
            is_archived: false,
        }
    }
}

/// Turns temporary conversations into persisted ones.
#[derive(Clone)]
pub struct IdentityManager {
    api: Arc<dyn CouncilApi>,
    title_max_chars: usize,
    suppressed_reload: Arc<Mutex<Option<String>>>,
}

impl IdentityManager {
    pub fn new(api: Arc<dyn CouncilApi>, title_max_chars: usize) -> Self {
        Self {
            api,
            title_max_chars,
            suppressed_reload: Arc::new(Mutex::new(None)),
        }
    }

    /// Create the server-side conversation for a first message.
    ///
    /// Nothing is applied here; the caller swaps the id into its state under
    /// its own lock.
    pub async fn create(&self, business_id: Option<String>, first_input: &str) -> ApiResult<Promotion> {
        let created = self.api.create_conversation(business_id).await?;
        let title = provisional_title(first_input, self.title_max_chars);

        info!(conv_id = %created.id, title = %title, "Conversation persisted");
        Ok(Promotion {
            persisted_id: created.id,
            created_at: created.created_at,
            title,
        })
    }

    /// Arm the one-shot guard that skips the next detail reload of `id`.
    pub fn suppress_next_reload(&self, id: &str) {
        *self.suppressed_reload.lock() = Some(id.to_string());
    }

    /// Whether the guard is armed for `id`. The guard is consumed by any
    /// open, matching or not.
    pub fn take_reload_suppression(&self, id: &str) -> bool {
        self.suppressed_reload.lock().take().as_deref() == Some(id)
    }

    /// Disarm the guard once the promoted conversation leaves the screen.
    pub fn clear_reload_suppression(&self) {
        if let Some(id) = self.suppressed_reload.lock().take() {
            debug!(conv_id = %id, "Reload guard cleared");
        }
    }
}
