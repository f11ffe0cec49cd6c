use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::models::{Conversation, ListQuery, SummaryList};

/// State shared by the session and the list synchronizer.
///
/// Guarded by one `parking_lot::Mutex`; no lock is ever held across an
/// await point.
pub struct ClientState {
    active: Arc<Conversation>,
    updates: watch::Sender<Arc<Conversation>>,
    pub summaries: SummaryList,
    /// Ids removed by a bulk deletion that has not committed yet
    pub hidden: HashSet<String>,
    /// Current list query; `offset` is filled in per request
    pub query: ListQuery,
}

pub type SharedState = Arc<Mutex<ClientState>>;

impl ClientState {
    pub fn new(page_size: usize) -> Self {
        let active = Arc::new(Conversation::temporary());
        let (updates, _) = watch::channel(Arc::clone(&active));
        Self {
            active,
            updates,
            summaries: SummaryList::new(),
            hidden: HashSet::new(),
            query: ListQuery {
                limit: page_size,
                ..Default::default()
            },
        }
    }

    pub fn shared(page_size: usize) -> SharedState {
        Arc::new(Mutex::new(Self::new(page_size)))
    }

    pub fn active(&self) -> &Arc<Conversation> {
        &self.active
    }

    /// Replace the active snapshot and notify subscribers.
    pub fn set_active(&mut self, snapshot: Arc<Conversation>) {
        self.active = Arc::clone(&snapshot);
        self.updates.send_replace(snapshot);
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Conversation>> {
        self.updates.subscribe()
    }

    /// Persisted id of the active conversation, if it has one.
    pub fn active_persisted_id(&self) -> Option<&str> {
        self.active.id().persisted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_active_notifies_subscribers() {
        let mut state = ClientState::new(20);
        let rx = state.subscribe();
        let next = Arc::new(Conversation::temporary());

        state.set_active(Arc::clone(&next));

        assert!(Arc::ptr_eq(&*rx.borrow(), &next));
        assert!(Arc::ptr_eq(state.active(), &next));
        assert_eq!(state.query.limit, 20);
    }
}
