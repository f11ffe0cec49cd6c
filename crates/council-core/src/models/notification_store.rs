use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationLevel {
    Warning,
    Error,
}

/// A message meant for the user, not for the log.
#[derive(Clone, Debug)]
pub struct Notification {
    pub timestamp: DateTime<Utc>,
    pub level: NotificationLevel,
    pub message: String,
}

/// Bounded, shareable list of user-visible notifications.
///
/// Cheap to clone; every clone writes into the same list.
#[derive(Clone)]
pub struct NotificationStore {
    entries: Arc<Mutex<VecDeque<Notification>>>,
    max_entries: usize,
}

impl NotificationStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max_entries,
        }
    }

    pub fn push(&self, level: NotificationLevel, message: impl Into<String>) {
        let mut entries = self.entries.lock();
        entries.push_back(Notification {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });

        // FIFO eviction when exceeding max
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(NotificationLevel::Error, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(NotificationLevel::Warning, message);
    }

    pub fn all(&self) -> Vec<Notification> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Notification> {
        self.entries.lock().back().cloned()
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|n| n.level == NotificationLevel::Error)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Notification> {
        self.entries.lock().drain(..).collect()
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_beyond_capacity() {
        let store = NotificationStore::new(2);
        store.error("first");
        store.warning("second");
        store.error("third");

        let messages: Vec<String> = store.all().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["second", "third"]);
        assert_eq!(store.error_count(), 1);
    }

    #[test]
    fn test_clones_share_entries() {
        let store = NotificationStore::default();
        let clone = store.clone();
        clone.error("boom");

        assert_eq!(store.len(), 1);
        assert_eq!(store.latest().unwrap().message, "boom");
        assert_eq!(store.drain().len(), 1);
        assert!(clone.is_empty());
    }
}
