//! Keeps the conversation summary list in step with the server.
//!
//! Star, archive and rename are applied to the list right away and rolled
//! back if the server refuses them. Bulk deletion is deferred behind an undo
//! window and committed at most once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::client_state::{ClientState, SharedState};
use crate::models::{
    Conversation, ConversationKey, ConversationSummary, NotificationStore, SortBy,
};
use crate::repositories::{ApiError, ApiResult, BoxFuture, CouncilApi};

type StateEdit = Box<dyn Fn(&mut ClientState) + Send + Sync>;

/// A list change applied before the server confirms it, paired with the
/// edit that undoes it.
pub struct OptimisticCommand {
    label: &'static str,
    apply: StateEdit,
    rollback: StateEdit,
}

impl OptimisticCommand {
    pub fn new(
        label: &'static str,
        apply: impl Fn(&mut ClientState) + Send + Sync + 'static,
        rollback: impl Fn(&mut ClientState) + Send + Sync + 'static,
    ) -> Self {
        Self {
            label,
            apply: Box::new(apply),
            rollback: Box::new(rollback),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn apply(&self, state: &mut ClientState) {
        (self.apply)(state);
    }

    pub fn rollback(&self, state: &mut ClientState) {
        (self.rollback)(state);
    }
}

fn set_starred(state: &mut ClientState, id: &str, starred: bool) {
    if let Some(summary) = state.summaries.get_mut(id) {
        summary.is_starred = starred;
    }
    state.summaries.sort_starred_first();
}

fn set_archived(state: &mut ClientState, id: &str, archived: bool) {
    if let Some(summary) = state.summaries.get_mut(id) {
        summary.is_archived = archived;
    }
}

fn set_title(state: &mut ClientState, id: &str, title: &str) {
    state.summaries.set_title(id, title);
    if state.active_persisted_id() == Some(id) {
        let renamed = Arc::new(state.active().with_title(title));
        state.set_active(renamed);
    }
}

#[derive(Clone)]
pub struct ListSynchronizer {
    api: Arc<dyn CouncilApi>,
    state: SharedState,
    notifications: NotificationStore,
    undo_window: Duration,
}

impl ListSynchronizer {
    pub fn new(
        api: Arc<dyn CouncilApi>,
        state: SharedState,
        notifications: NotificationStore,
        undo_window: Duration,
    ) -> Self {
        Self {
            api,
            state,
            notifications,
            undo_window,
        }
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.state.lock().summaries.items().to_vec()
    }

    pub fn has_more(&self) -> bool {
        self.state.lock().summaries.has_more()
    }

    /// Reload the first page with the current sort and search.
    pub async fn refresh(&self) -> ApiResult<()> {
        let mut query = self.state.lock().query.clone();
        query.offset = 0;

        let mut page = self.api.list_conversations(query).await?;

        let mut state = self.state.lock();
        page.items.retain(|s| !state.hidden.contains(&s.id));
        debug!(count = page.items.len(), has_more = page.has_more, "Summaries refreshed");
        state.summaries.replace_page(page);
        Ok(())
    }

    /// Append the next page.
    pub async fn load_more(&self) -> ApiResult<()> {
        let query = {
            let state = self.state.lock();
            if !state.summaries.has_more() {
                return Ok(());
            }
            let mut query = state.query.clone();
            // Hidden rows still exist server-side until their deletion commits
            query.offset = state.summaries.len() + state.hidden.len();
            query
        };

        let mut page = self.api.list_conversations(query).await?;

        let mut state = self.state.lock();
        page.items.retain(|s| !state.hidden.contains(&s.id));
        state.summaries.extend_page(page);
        Ok(())
    }

    pub async fn set_search(&self, search: Option<String>) -> ApiResult<()> {
        self.state.lock().query.search = search.filter(|s| !s.trim().is_empty());
        self.refresh().await
    }

    pub async fn set_sort_by(&self, sort_by: SortBy) -> ApiResult<()> {
        self.state.lock().query.sort_by = sort_by;
        self.refresh().await
    }

    /// Apply `command`, wait for `confirm`, and roll back if it fails.
    pub async fn run(
        &self,
        command: OptimisticCommand,
        confirm: BoxFuture<'static, ApiResult<()>>,
    ) -> ApiResult<()> {
        command.apply(&mut self.state.lock());

        match confirm.await {
            Ok(()) => {
                debug!(action = command.label(), "Optimistic action confirmed");
                Ok(())
            }
            Err(e) => {
                warn!(action = command.label(), error = %e, "Optimistic action failed, rolling back");
                command.rollback(&mut self.state.lock());
                self.notifications
                    .error(format!("Could not {} conversation: {}", command.label(), e));
                Err(e)
            }
        }
    }

    fn current<T>(&self, id: &str, read: impl FnOnce(&ConversationSummary) -> T) -> ApiResult<T> {
        self.state
            .lock()
            .summaries
            .get(id)
            .map(read)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    pub async fn star(&self, id: &str, starred: bool) -> ApiResult<()> {
        let previous = self.current(id, |s| s.is_starred)?;
        let (apply_id, rollback_id) = (id.to_string(), id.to_string());

        let command = OptimisticCommand::new(
            "star",
            move |state| set_starred(state, &apply_id, starred),
            move |state| set_starred(state, &rollback_id, previous),
        );
        self.run(command, self.api.star_conversation(id, starred)).await
    }

    pub async fn archive(&self, id: &str, archived: bool) -> ApiResult<()> {
        let previous = self.current(id, |s| s.is_archived)?;
        let (apply_id, rollback_id) = (id.to_string(), id.to_string());

        let command = OptimisticCommand::new(
            "archive",
            move |state| set_archived(state, &apply_id, archived),
            move |state| set_archived(state, &rollback_id, previous),
        );
        self.run(command, self.api.archive_conversation(id, archived))
            .await
    }

    pub async fn rename(&self, id: &str, title: &str) -> ApiResult<()> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(ApiError::InvalidData {
                message: "title must not be empty".to_string(),
            });
        }
        let previous = self.current(id, |s| s.title.clone())?;
        let (apply_id, rollback_id) = (id.to_string(), id.to_string());
        let new_title = title.clone();

        let command = OptimisticCommand::new(
            "rename",
            move |state| set_title(state, &apply_id, &new_title),
            move |state| set_title(state, &rollback_id, &previous),
        );
        self.run(command, self.api.rename_conversation(id, &title))
            .await
    }

    /// Remove `ids` from the list now and delete them on the server once
    /// the undo window elapses.
    ///
    /// Spawns the countdown on the current tokio runtime.
    pub fn bulk_delete(&self, ids: Vec<String>) -> DeletionHandle {
        let (removed, cleared) = {
            let mut state = self.state.lock();
            let removed = state.summaries.remove_many(&ids);
            state.hidden.extend(ids.iter().cloned());

            let selection_deleted = state
                .active_persisted_id()
                .is_some_and(|active| ids.iter().any(|id| id == active));

            let cleared = if selection_deleted {
                let previous = Arc::clone(state.active());
                let replacement = Arc::new(Conversation::temporary());
                let replacement_key = replacement.key();
                state.set_active(replacement);
                Some(ClearedSelection {
                    previous,
                    replacement_key,
                })
            } else {
                None
            };
            (removed, cleared)
        };

        info!(count = ids.len(), window_ms = self.undo_window.as_millis() as u64, "Bulk deletion pending");

        let handle = DeletionHandle {
            inner: Arc::new(PendingDeletion {
                ids,
                removed,
                cleared,
                phase: Mutex::new(DeletionPhase::Pending),
                lists: self.clone(),
            }),
        };

        let timer = handle.clone();
        let window = self.undo_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(e) = timer.commit().await {
                warn!(error = %e, "Deferred bulk deletion failed");
            }
        });

        handle
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionPhase {
    Pending,
    Committing,
    Committed,
    Undone,
    Failed,
}

struct ClearedSelection {
    previous: Arc<Conversation>,
    /// Key of the blank conversation put in its place
    replacement_key: ConversationKey,
}

struct PendingDeletion {
    ids: Vec<String>,
    removed: Vec<(usize, ConversationSummary)>,
    cleared: Option<ClearedSelection>,
    phase: Mutex<DeletionPhase>,
    lists: ListSynchronizer,
}

impl PendingDeletion {
    /// Put the removed rows back where they were, and the selection too if
    /// the user has not picked anything else since.
    fn restore(&self) {
        let mut state = self.lists.state.lock();
        state.summaries.restore(&self.removed);
        for id in &self.ids {
            state.hidden.remove(id);
        }
        if let Some(cleared) = &self.cleared
            && state.active().key() == cleared.replacement_key
        {
            state.set_active(Arc::clone(&cleared.previous));
        }
    }
}

/// Undo handle for a pending bulk deletion.
#[derive(Clone)]
pub struct DeletionHandle {
    inner: Arc<PendingDeletion>,
}

impl DeletionHandle {
    pub fn ids(&self) -> &[String] {
        &self.inner.ids
    }

    pub fn phase(&self) -> DeletionPhase {
        *self.inner.phase.lock()
    }

    /// Cancel the deletion. Returns false if it already started committing.
    pub fn undo(&self) -> bool {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != DeletionPhase::Pending {
                debug!(phase = ?*phase, "Undo ignored, deletion no longer pending");
                return false;
            }
            *phase = DeletionPhase::Undone;
        }

        self.inner.restore();
        info!(count = self.inner.ids.len(), "Bulk deletion undone");
        true
    }

    /// Commit right away instead of waiting for the countdown.
    pub async fn dismiss(&self) -> ApiResult<bool> {
        self.commit().await
    }

    /// Send the deletion to the server. Returns `Ok(false)` if this call did
    /// not own the commit (already committed, committing, or undone).
    async fn commit(&self) -> ApiResult<bool> {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != DeletionPhase::Pending {
                return Ok(false);
            }
            *phase = DeletionPhase::Committing;
        }

        let lists = &self.inner.lists;
        match lists
            .api
            .bulk_delete_conversations(self.inner.ids.clone())
            .await
        {
            Ok(result) => {
                *self.inner.phase.lock() = DeletionPhase::Committed;
                let mut state = lists.state.lock();
                for id in &self.inner.ids {
                    state.hidden.remove(id);
                }
                info!(
                    requested = self.inner.ids.len(),
                    deleted = result.deleted.len(),
                    "Bulk deletion committed"
                );
                Ok(true)
            }
            Err(e) => {
                *self.inner.phase.lock() = DeletionPhase::Failed;
                self.inner.restore();
                lists.notifications.error(format!(
                    "Could not delete {} conversation(s): {}",
                    self.inner.ids.len(),
                    e
                ));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::client_state::ClientState;
    use crate::repositories::{FailureToggles, InMemoryCouncilApi};
    use chrono::Utc;

    const WINDOW: Duration = Duration::from_secs(5);

    fn summary(id: &str, count: usize) -> ConversationSummary {
        ConversationSummary {
            id: id.to_string(),
            title: format!("Title {}", id),
            created_at: Utc::now(),
            message_count: count,
            is_starred: false,
            is_archived: false,
        }
    }

    /// List showing a, b, c, d in that order.
    async fn setup() -> (InMemoryCouncilApi, ListSynchronizer, NotificationStore) {
        let api = InMemoryCouncilApi::new();
        for (id, count) in [("d", 1), ("c", 8), ("b", 2), ("a", 4)] {
            api.insert_summary(summary(id, count));
        }
        let notifications = NotificationStore::default();
        let lists = ListSynchronizer::new(
            Arc::new(api.clone()),
            ClientState::shared(20),
            notifications.clone(),
            WINDOW,
        );
        lists.refresh().await.unwrap();
        (api, lists, notifications)
    }

    fn ids(lists: &ListSynchronizer) -> Vec<String> {
        lists.summaries().into_iter().map(|s| s.id).collect()
    }

    fn select(lists: &ListSynchronizer, id: &str) -> Arc<Conversation> {
        let conversation = Arc::new(Conversation::persisted(
            id.to_string(),
            format!("Title {}", id),
            Utc::now(),
            Vec::new(),
        ));
        lists.state.lock().set_active(Arc::clone(&conversation));
        conversation
    }

    #[tokio::test]
    async fn test_star_sorts_starred_first() {
        let (api, lists, _) = setup().await;

        lists.star("d", true).await.unwrap();

        assert_eq!(ids(&lists), vec!["d", "c", "a", "b"]);
        assert!(api.summary("d").unwrap().is_starred);
    }

    #[tokio::test]
    async fn test_failed_star_rolls_back_and_notifies() {
        let (api, lists, notifications) = setup().await;
        api.set_failures(FailureToggles {
            star: true,
            ..Default::default()
        });

        assert!(lists.star("d", true).await.is_err());

        let summaries = lists.summaries();
        assert!(summaries.iter().all(|s| !s.is_starred));
        assert_eq!(summaries[0].id, "c");
        assert_eq!(notifications.error_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_rename_restores_title_everywhere() {
        let (api, lists, notifications) = setup().await;
        select(&lists, "b");
        api.set_failures(FailureToggles {
            rename: true,
            ..Default::default()
        });

        assert!(lists.rename("b", "Renamed").await.is_err());

        assert_eq!(lists.summaries()[1].title, "Title b");
        assert_eq!(lists.state.lock().active().title(), "Title b");
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_rename_updates_active_conversation() {
        let (_, lists, _) = setup().await;
        select(&lists, "a");

        lists.rename("a", "  Canada plan ").await.unwrap();

        assert_eq!(lists.summaries()[0].title, "Canada plan");
        assert_eq!(lists.state.lock().active().title(), "Canada plan");
        assert!(matches!(
            lists.rename("a", "   ").await,
            Err(ApiError::InvalidData { .. })
        ));
    }

    #[tokio::test]
    async fn test_archive_unknown_conversation_is_not_found() {
        let (_, lists, _) = setup().await;
        assert!(matches!(
            lists.archive("zzz", true).await,
            Err(ApiError::NotFound(_))
        ));
        lists.archive("c", true).await.unwrap();
        assert!(lists.summaries()[2].is_archived);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_restores_order_and_selection() {
        let (api, lists, _) = setup().await;
        let selected = select(&lists, "c");

        let handle = lists.bulk_delete(vec!["b".to_string(), "c".to_string()]);
        assert_eq!(ids(&lists), vec!["a", "d"]);
        assert!(lists.state.lock().active().is_temporary());

        assert!(handle.undo());
        assert_eq!(ids(&lists), vec!["a", "b", "c", "d"]);
        assert!(Arc::ptr_eq(lists.state.lock().active(), &selected));

        tokio::time::sleep(WINDOW * 2).await;
        assert!(api.bulk_delete_calls().is_empty());
        assert_eq!(handle.phase(), DeletionPhase::Undone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_keeps_newer_selection() {
        let (_, lists, _) = setup().await;
        select(&lists, "b");

        let handle = lists.bulk_delete(vec!["b".to_string()]);
        let newer = select(&lists, "a");

        assert!(handle.undo());
        assert!(Arc::ptr_eq(lists.state.lock().active(), &newer));
        assert_eq!(ids(&lists), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_commits_once_and_undo_is_noop_after() {
        let (api, lists, _) = setup().await;

        let handle = lists.bulk_delete(vec!["a".to_string()]);
        tokio::time::sleep(WINDOW + Duration::from_millis(100)).await;

        assert_eq!(handle.phase(), DeletionPhase::Committed);
        assert_eq!(api.bulk_delete_calls(), vec![vec!["a".to_string()]]);

        assert!(!handle.undo());
        assert_eq!(ids(&lists), vec!["b", "c", "d"]);

        lists.refresh().await.unwrap();
        assert_eq!(ids(&lists), vec!["b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_then_timeout_commits_once() {
        let (api, lists, _) = setup().await;

        let handle = lists.bulk_delete(vec!["d".to_string()]);
        assert!(handle.dismiss().await.unwrap());
        assert!(!handle.dismiss().await.unwrap());

        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(api.bulk_delete_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_restores_list() {
        let (api, lists, notifications) = setup().await;
        let selected = select(&lists, "a");
        api.set_failures(FailureToggles {
            bulk_delete: true,
            ..Default::default()
        });

        let handle = lists.bulk_delete(vec!["a".to_string(), "d".to_string()]);
        assert!(handle.dismiss().await.is_err());

        assert_eq!(handle.phase(), DeletionPhase::Failed);
        assert_eq!(ids(&lists), vec!["a", "b", "c", "d"]);
        assert!(Arc::ptr_eq(lists.state.lock().active(), &selected));
        assert_eq!(notifications.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_hides_pending_deletions() {
        let (_, lists, _) = setup().await;

        let handle = lists.bulk_delete(vec!["c".to_string()]);
        lists.refresh().await.unwrap();
        assert_eq!(ids(&lists), vec!["a", "b", "d"]);

        handle.undo();
        assert_eq!(ids(&lists), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_search_and_sort_reload_first_page() {
        let (_, lists, _) = setup().await;

        lists.set_sort_by(SortBy::Activity).await.unwrap();
        assert_eq!(ids(&lists), vec!["c", "a", "b", "d"]);

        lists.set_search(Some("title b".to_string())).await.unwrap();
        assert_eq!(ids(&lists), vec!["b"]);

        lists.set_search(Some("  ".to_string())).await.unwrap();
        assert_eq!(lists.summaries().len(), 4);
    }

    #[tokio::test]
    async fn test_load_more_appends_next_page() {
        let api = InMemoryCouncilApi::new();
        for idx in 0..5 {
            api.insert_summary(summary(&format!("conv-{}", idx), idx));
        }
        let lists = ListSynchronizer::new(
            Arc::new(api),
            ClientState::shared(2),
            NotificationStore::default(),
            WINDOW,
        );

        lists.refresh().await.unwrap();
        assert_eq!(lists.summaries().len(), 2);
        assert!(lists.has_more());

        lists.load_more().await.unwrap();
        lists.load_more().await.unwrap();
        assert_eq!(ids(&lists), vec!["conv-4", "conv-3", "conv-2", "conv-1", "conv-0"]);
        assert!(!lists.has_more());
    }
}
