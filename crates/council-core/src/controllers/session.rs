use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client_state::{ClientState, SharedState};
use super::error::{SessionError, SessionResult};
use super::identity::{IdentityManager, Promotion};
use super::list_sync::ListSynchronizer;
use super::stream_manager::{StreamHandle, StreamManager, StreamStatus};
use crate::models::{
    AttachmentFile, Conversation, ConversationKey, ConversationSummary, CouncilEvent, Message,
    NotificationStore, Stage, TurnMode,
};
use crate::repositories::{ApiError, CouncilApi};
use crate::services::{Effect, TurnOutcome, finalize_interrupted, finalize_stopped, reduce};
use crate::settings::{ClientSettings, ContextSelectionStore};

/// One client's view of the council: the active conversation, the summary
/// list, and the turn currently streaming into it.
///
/// Cheap to clone; clones drive the same session, so `stop_generation` can
/// be called from another task while `send_message` is awaiting.
#[derive(Clone)]
pub struct CouncilSession {
    api: Arc<dyn CouncilApi>,
    settings: ClientSettings,
    context: ContextSelectionStore,
    notifications: NotificationStore,
    state: SharedState,
    streams: Arc<Mutex<StreamManager>>,
    identity: IdentityManager,
    lists: ListSynchronizer,
}

impl CouncilSession {
    pub fn new(
        api: Arc<dyn CouncilApi>,
        settings: ClientSettings,
        context: ContextSelectionStore,
    ) -> Self {
        let notifications = NotificationStore::default();
        let state = ClientState::shared(settings.page_size);
        let lists = ListSynchronizer::new(
            Arc::clone(&api),
            Arc::clone(&state),
            notifications.clone(),
            settings.undo_window(),
        );
        let identity = IdentityManager::new(Arc::clone(&api), settings.provisional_title_max_chars);

        Self {
            api,
            settings,
            context,
            notifications,
            state,
            streams: Arc::new(Mutex::new(StreamManager::new())),
            identity,
            lists,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn context(&self) -> &ContextSelectionStore {
        &self.context
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    /// Star, archive, rename, bulk delete and paging.
    pub fn lists(&self) -> &ListSynchronizer {
        &self.lists
    }

    pub fn active(&self) -> Arc<Conversation> {
        Arc::clone(self.state.lock().active())
    }

    /// Receive every new snapshot of the active conversation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Conversation>> {
        self.state.lock().subscribe()
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.lists.summaries()
    }

    /// Whether the active conversation has a turn in flight.
    pub fn is_streaming(&self) -> bool {
        let key = self.state.lock().active().key();
        self.streams.lock().is_streaming(key)
    }

    /// Show a fresh, unsaved conversation. A turn still streaming into the
    /// previous one keeps running off screen.
    pub fn new_conversation(&self) -> Arc<Conversation> {
        let fresh = Arc::new(Conversation::temporary());
        self.state.lock().set_active(Arc::clone(&fresh));
        self.identity.clear_reload_suppression();
        debug!(conv_key = %fresh.key(), "New conversation");
        fresh
    }

    /// Load a conversation from the server and make it active.
    ///
    /// Returns `Ok(false)` when the load was skipped because the active
    /// conversation was just promoted to `id` and is still on screen.
    pub async fn open_conversation(&self, id: &str) -> SessionResult<bool> {
        let suppressed = self.identity.take_reload_suppression(id);
        if suppressed && self.state.lock().active_persisted_id() == Some(id) {
            debug!(conv_id = %id, "Skipping detail reload right after promotion");
            return Ok(false);
        }

        let detail = self.api.get_conversation(id).await.inspect_err(|e| {
            warn!(conv_id = %id, error = %e, "Failed to load conversation");
        })?;
        let conversation = Arc::new(Conversation::from(detail));

        info!(conv_id = %id, messages = conversation.message_count(), "Conversation opened");
        self.state.lock().set_active(conversation);
        Ok(true)
    }

    /// Stop the turn streaming into the active conversation.
    ///
    /// The in-flight message is finalized right away (every stage out of
    /// loading, marked stopped) unless it already finished; the transport
    /// notices the cancelled token on its own. Returns false when nothing was
    /// streaming.
    pub fn stop_generation(&self) -> bool {
        let key = self.state.lock().active().key();
        if !self.streams.lock().stop_stream(key) {
            debug!(conv_key = %key, "Nothing to stop");
            return false;
        }

        let mut state = self.state.lock();
        let in_flight = state
            .active()
            .last_message()
            .is_some_and(|m| m.loading.any());
        if state.active().key() == key && in_flight {
            let stopped = finalize_stopped(state.active());
            state.set_active(stopped);
        }
        info!(conv_key = %key, "Generation stopped by user");
        true
    }

    /// Send one user message in the active conversation and drive its turn
    /// to the end.
    ///
    /// Returns how the turn ended. Only a failure to set the turn up at all
    /// (empty input, a turn already running, conversation creation) is an
    /// `Err`; stream failures end the turn with [`TurnOutcome::Failed`] and a
    /// notification.
    pub async fn send_message(
        &self,
        content: &str,
        attachments: Vec<AttachmentFile>,
        mode: TurnMode,
    ) -> SessionResult<TurnOutcome> {
        let content = content.trim();
        if content.is_empty() && attachments.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        debug!(attachment_count = attachments.len(), mode = ?mode, "send_message called");

        // PHASE 1: Optimistic user message and assistant placeholder
        let first_stage = match mode {
            TurnMode::Council => Stage::One,
            TurnMode::Chat => Stage::Three,
        };
        let (before, handle, mut latest) = {
            let mut state = self.state.lock();
            let before = Arc::clone(state.active());
            let Some(handle) = self.streams.lock().try_register_stream(before.key()) else {
                return Err(SessionError::TurnInFlight);
            };
            let optimistic = Arc::new(before.with_messages_appended([
                Message::user(content, Vec::new()),
                Message::assistant_placeholder(first_stage),
            ]));
            state.set_active(Arc::clone(&optimistic));
            (before, handle, optimistic)
        };
        let key = handle.key;

        // PHASE 2: Make sure the server knows the conversation
        let conversation_id = match before.id().persisted() {
            Some(id) => id.to_string(),
            None => match self.identity.create(self.context.business_id(), content).await {
                Ok(promotion) => {
                    self.promote(key, &mut latest, &promotion);
                    promotion.persisted_id
                }
                Err(e) => {
                    error!(error = %e, "Failed to create conversation");
                    {
                        let mut state = self.state.lock();
                        if state.active().key() == key {
                            state.set_active(Arc::clone(&before));
                        }
                    }
                    self.streams
                        .lock()
                        .finish_stream(&handle, StreamStatus::Error(e.to_string()));
                    self.notifications
                        .error(format!("Could not start the conversation: {}", e));
                    return Err(e.into());
                }
            },
        };

        // PHASE 3: Attachments
        let attachment_ids = self.upload_attachments(attachments).await;

        if handle.token.is_cancelled() {
            return Ok(self.finish_turn(&handle, TurnOutcome::Cancelled));
        }

        // PHASE 4: Open the stream
        let context = self.context.to_stream_context(attachment_ids);
        let token = handle.token.clone();
        let opened = match mode {
            TurnMode::Council => {
                self.api
                    .open_council_stream(&conversation_id, content, context, token)
                    .await
            }
            TurnMode::Chat => {
                self.api
                    .open_chat_stream(&conversation_id, content, context, token)
                    .await
            }
        };

        let mut events = match opened {
            Ok(events) => events,
            Err(ApiError::Cancelled) => {
                return Ok(self.finish_turn(&handle, TurnOutcome::Cancelled));
            }
            Err(e) => {
                error!(conv_id = %conversation_id, error = %e, "Failed to open stream");
                let failure = CouncilEvent::Error {
                    message: e.to_string(),
                };
                self.apply_event(&handle.token, key, &mut latest, &conversation_id, &failure);
                return Ok(self.finish_turn(&handle, TurnOutcome::Failed(e.to_string())));
            }
        };
        info!(conv_id = %conversation_id, mode = ?mode, "Turn streaming");

        // PHASE 5: Fold events into the conversation
        let mut refresh_requested = false;
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = handle.token.cancelled() => None,
                item = events.next() => Some(item),
            };

            let event = match next {
                None | Some(Some(Err(ApiError::Cancelled))) => break TurnOutcome::Cancelled,
                Some(None) => {
                    warn!(conv_id = %conversation_id, "Stream ended without a terminal event");
                    self.interrupt(&handle.token, key, &mut latest);
                    break TurnOutcome::Failed("The response ended unexpectedly".to_string());
                }
                Some(Some(Err(e))) => CouncilEvent::Error {
                    message: e.to_string(),
                },
                Some(Some(Ok(event))) => event,
            };

            let mut ended = None;
            for effect in self.apply_event(&handle.token, key, &mut latest, &conversation_id, &event) {
                match effect {
                    Effect::RefreshSummaries => refresh_requested = true,
                    Effect::TurnEnded(outcome) => ended = Some(outcome),
                    Effect::TitleChanged(_) => {}
                }
            }
            if let Some(outcome) = ended {
                break outcome;
            }
        };
        drop(events);

        // PHASE 6: Release the stream slot and resync the list
        let outcome = self.finish_turn(&handle, outcome);
        if refresh_requested && let Err(e) = self.lists.refresh().await {
            warn!(error = %e, "Failed to refresh conversation list");
        }
        Ok(outcome)
    }

    /// Swap the server id into the turn's conversation and put it at the top
    /// of the list, all under one lock.
    fn promote(&self, key: ConversationKey, latest: &mut Arc<Conversation>, promotion: &Promotion) {
        let mut state = self.state.lock();
        if state.active().key() == key {
            let promoted = Arc::new(promotion.apply_to(state.active()));
            *latest = Arc::clone(&promoted);
            state.set_active(promoted);
        } else {
            *latest = Arc::new(promotion.apply_to(latest));
        }
        state.summaries.upsert_front(promotion.summary());
        self.identity.suppress_next_reload(&promotion.persisted_id);
    }

    async fn upload_attachments(&self, files: Vec<AttachmentFile>) -> Vec<String> {
        if files.is_empty() {
            return Vec::new();
        }

        let uploads = files
            .into_iter()
            .map(|file| self.api.upload_attachment(file));
        let results = futures::future::join_all(uploads).await;

        let mut ids = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(uploaded) => ids.push(uploaded.id),
                Err(e) => {
                    warn!(error = %e, "Attachment upload failed, sending without attachments");
                    return Vec::new();
                }
            }
        }
        ids
    }

    /// Reduce one event into the turn's conversation.
    ///
    /// The active snapshot is updated when the turn's conversation is still
    /// on screen; otherwise the turn keeps folding into its own detached
    /// copy so titles and the list stay right. Nothing is applied once the
    /// turn's token has been cancelled.
    fn apply_event(
        &self,
        token: &CancellationToken,
        key: ConversationKey,
        latest: &mut Arc<Conversation>,
        conversation_id: &str,
        event: &CouncilEvent,
    ) -> Vec<Effect> {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return Vec::new();
        }

        let shown = state.active().key() == key;
        let base = if shown {
            Arc::clone(state.active())
        } else {
            Arc::clone(latest)
        };

        let reduction = reduce(&base, event);
        *latest = Arc::clone(&reduction.snapshot);
        if shown && !Arc::ptr_eq(&base, &reduction.snapshot) {
            state.set_active(reduction.snapshot);
        }

        for effect in &reduction.effects {
            if let Effect::TitleChanged(title) = effect {
                state.summaries.set_title(conversation_id, title);
            }
        }
        reduction.effects
    }

    fn interrupt(&self, token: &CancellationToken, key: ConversationKey, latest: &mut Arc<Conversation>) {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return;
        }
        *latest = finalize_interrupted(latest);
        if state.active().key() == key {
            let finalized = finalize_interrupted(state.active());
            state.set_active(finalized);
        }
    }

    fn finish_turn(&self, handle: &StreamHandle, outcome: TurnOutcome) -> TurnOutcome {
        let status = match &outcome {
            TurnOutcome::Completed => StreamStatus::Completed,
            TurnOutcome::Cancelled => StreamStatus::Cancelled,
            TurnOutcome::Failed(message) => StreamStatus::Error(message.clone()),
        };
        self.streams.lock().finish_stream(handle, status);

        match &outcome {
            TurnOutcome::Completed => info!(conv_key = %handle.key, "Turn completed"),
            TurnOutcome::Cancelled => debug!(conv_key = %handle.key, "Turn cancelled"),
            TurnOutcome::Failed(message) => {
                self.notifications
                    .error(format!("The council could not answer: {}", message));
            }
        }
        outcome
    }
}
