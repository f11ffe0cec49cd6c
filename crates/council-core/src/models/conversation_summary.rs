use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sidebar projection of a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub is_starred: bool,
    #[serde(default)]
    pub is_archived: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Date,
    Activity,
}

impl SortBy {
    pub fn as_str(self) -> &'static str {
        match self {
            SortBy::Date => "date",
            SortBy::Activity => "activity",
        }
    }
}

/// Parameters of one `list_conversations` page request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortBy,
    pub search: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPage {
    #[serde(alias = "conversations")]
    pub items: Vec<ConversationSummary>,
    #[serde(default)]
    pub has_more: bool,
}

/// Ordered summary list shown in the sidebar.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryList {
    items: Vec<ConversationSummary>,
    has_more: bool,
}

impl SummaryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ConversationSummary] {
        &self.items
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ConversationSummary> {
        self.items.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ConversationSummary> {
        self.items.iter_mut().find(|s| s.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|s| s.id == id)
    }

    pub fn replace_page(&mut self, page: ConversationPage) {
        self.items = page.items;
        self.has_more = page.has_more;
    }

    /// Append a follow-up page, skipping ids already present.
    pub fn extend_page(&mut self, page: ConversationPage) {
        for summary in page.items {
            if self.position(&summary.id).is_none() {
                self.items.push(summary);
            }
        }
        self.has_more = page.has_more;
    }

    /// Insert at the top, replacing any existing entry with the same id.
    pub fn upsert_front(&mut self, summary: ConversationSummary) {
        self.items.retain(|s| s.id != summary.id);
        self.items.insert(0, summary);
    }

    pub fn set_title(&mut self, id: &str, title: &str) -> bool {
        match self.get_mut(id) {
            Some(summary) => {
                summary.title = title.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove every listed id, returning the removed entries together with
    /// the index each one occupied, in ascending index order.
    pub fn remove_many(&mut self, ids: &[String]) -> Vec<(usize, ConversationSummary)> {
        let mut removed = Vec::new();
        let mut idx = 0;
        let mut original_idx = 0;
        while idx < self.items.len() {
            if ids.contains(&self.items[idx].id) {
                removed.push((original_idx, self.items.remove(idx)));
            } else {
                idx += 1;
            }
            original_idx += 1;
        }
        removed
    }

    /// Reinsert entries produced by [`SummaryList::remove_many`] at their
    /// original positions. Indices past the end append.
    pub fn restore(&mut self, removed: &[(usize, ConversationSummary)]) {
        for (idx, summary) in removed {
            if self.position(&summary.id).is_some() {
                continue;
            }
            let at = (*idx).min(self.items.len());
            self.items.insert(at, summary.clone());
        }
    }

    /// Starred first, then by descending message count. Stable, so equal
    /// entries keep their relative order.
    pub fn sort_starred_first(&mut self) {
        self.items
            .sort_by_key(|s| (Reverse(s.is_starred), Reverse(s.message_count)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, count: usize, starred: bool) -> ConversationSummary {
        ConversationSummary {
            id: id.to_string(),
            title: format!("Title {}", id),
            created_at: Utc::now(),
            message_count: count,
            is_starred: starred,
            is_archived: false,
        }
    }

    fn list(items: Vec<ConversationSummary>) -> SummaryList {
        let mut list = SummaryList::new();
        list.replace_page(ConversationPage {
            items,
            has_more: false,
        });
        list
    }

    #[test]
    fn test_remove_and_restore_keeps_original_order() {
        let mut list = list(vec![
            summary("a", 1, false),
            summary("b", 2, false),
            summary("c", 3, false),
            summary("d", 4, false),
            summary("e", 5, false),
        ]);

        let removed = list.remove_many(&["b".to_string(), "d".to_string(), "e".to_string()]);
        assert_eq!(list.ids(), vec!["a", "c"]);
        assert_eq!(
            removed.iter().map(|(i, s)| (*i, s.id.as_str())).collect::<Vec<_>>(),
            vec![(1, "b"), (3, "d"), (4, "e")]
        );

        list.restore(&removed);
        assert_eq!(list.ids(), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_restore_skips_entries_already_present() {
        let mut list = list(vec![summary("a", 1, false), summary("b", 1, false)]);
        let removed = list.remove_many(&["a".to_string()]);
        list.upsert_front(summary("a", 9, false));
        list.restore(&removed);
        assert_eq!(list.ids(), vec!["a", "b"]);
        assert_eq!(list.get("a").unwrap().message_count, 9);
    }

    #[test]
    fn test_sort_starred_first_then_message_count() {
        let mut list = list(vec![
            summary("few", 2, false),
            summary("starred-small", 1, true),
            summary("many", 10, false),
            summary("starred-big", 8, true),
        ]);
        list.sort_starred_first();
        assert_eq!(list.ids(), vec!["starred-big", "starred-small", "many", "few"]);
    }

    #[test]
    fn test_extend_page_skips_duplicates() {
        let mut list = list(vec![summary("a", 1, false)]);
        list.extend_page(ConversationPage {
            items: vec![summary("a", 1, false), summary("b", 1, false)],
            has_more: true,
        });
        assert_eq!(list.ids(), vec!["a", "b"]);
        assert!(list.has_more());
    }

    #[test]
    fn test_page_accepts_conversations_alias() {
        let page: ConversationPage = serde_json::from_str(
            r#"{"conversations":[{"id":"x","title":"T","created_at":"2026-01-02T03:04:05Z"}],"has_more":true}"#,
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].message_count, 0);
        assert!(page.has_more);
    }
}
