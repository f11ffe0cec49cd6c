use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::council_api::{
    BoxFuture, BulkDeleteResult, CouncilApi, CreatedConversation, EventStream,
    UploadedAttachment,
};
use super::error::{ApiError, ApiResult};
use crate::models::{
    AttachmentFile, ConversationDetail, ConversationPage, ConversationSummary, CouncilEvent,
    ListQuery, Message, SortBy, StreamContext, TurnMode,
};

/// Events one opened stream will replay.
#[derive(Clone, Debug, Default)]
pub struct StreamScript {
    pub events: Vec<CouncilEvent>,
    /// Keep the stream open after the last event until it is cancelled
    pub hold_open: bool,
    /// Break the connection with this server error after the last event
    pub transport_error: Option<String>,
}

impl StreamScript {
    pub fn new(events: Vec<CouncilEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn held_open(events: Vec<CouncilEvent>) -> Self {
        Self {
            events,
            hold_open: true,
            ..Default::default()
        }
    }

    pub fn broken_after(events: Vec<CouncilEvent>, error: impl Into<String>) -> Self {
        Self {
            events,
            transport_error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Calls that should fail with an injected server error.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailureToggles {
    pub create: bool,
    pub upload: bool,
    pub archive: bool,
    pub star: bool,
    pub rename: bool,
    pub bulk_delete: bool,
    pub open_stream: bool,
}

/// One stream request as received.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub conversation_id: String,
    pub content: String,
    pub context: StreamContext,
    pub mode: TurnMode,
}

#[derive(Default)]
struct State {
    conversations: HashMap<String, ConversationDetail>,
    summaries: Vec<ConversationSummary>,
    scripts: VecDeque<StreamScript>,
    failures: FailureToggles,
    next_id: usize,
    create_calls: usize,
    bulk_delete_calls: Vec<Vec<String>>,
    stream_requests: Vec<StreamRequest>,
}

/// [`CouncilApi`] backed by process memory.
///
/// Streams replay scripts queued with [`InMemoryCouncilApi::push_script`].
/// Cloning yields another handle onto the same server state.
#[derive(Clone, Default)]
pub struct InMemoryCouncilApi {
    state: Arc<Mutex<State>>,
}

fn injected(call: &str) -> ApiError {
    ApiError::Status {
        status: 500,
        body: format!("injected {} failure", call),
    }
}

impl InMemoryCouncilApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, script: StreamScript) {
        self.state.lock().scripts.push_back(script);
    }

    pub fn set_failures(&self, failures: FailureToggles) {
        self.state.lock().failures = failures;
    }

    /// Seed a stored conversation, newest first in the listing.
    pub fn insert_summary(&self, summary: ConversationSummary) {
        let mut state = self.state.lock();
        state.conversations.insert(
            summary.id.clone(),
            ConversationDetail {
                id: summary.id.clone(),
                title: Some(summary.title.clone()),
                created_at: summary.created_at,
                messages: Vec::new(),
            },
        );
        state.summaries.insert(0, summary);
    }

    pub fn summary(&self, id: &str) -> Option<ConversationSummary> {
        self.state.lock().summaries.iter().find(|s| s.id == id).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    pub fn bulk_delete_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().bulk_delete_calls.clone()
    }

    pub fn stream_requests(&self) -> Vec<StreamRequest> {
        self.state.lock().stream_requests.clone()
    }

    fn update_summary(
        &self,
        id: &str,
        failing: bool,
        call: &'static str,
        edit: impl FnOnce(&mut ConversationSummary),
    ) -> BoxFuture<'static, ApiResult<()>> {
        let result = {
            let mut state = self.state.lock();
            if failing {
                Err(injected(call))
            } else {
                match state.summaries.iter_mut().find(|s| s.id == id) {
                    Some(summary) => {
                        edit(summary);
                        Ok(())
                    }
                    None => Err(ApiError::NotFound(id.to_string())),
                }
            }
        };
        Box::pin(async move { result })
    }

    fn open_stream(
        &self,
        conversation_id: &str,
        content: &str,
        context: StreamContext,
        mode: TurnMode,
        token: CancellationToken,
    ) -> BoxFuture<'static, ApiResult<EventStream>> {
        let state = Arc::clone(&self.state);
        let conversation_id = conversation_id.to_string();
        let content = content.to_string();

        Box::pin(async move {
            if token.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let script = {
                let mut guard = state.lock();
                if guard.failures.open_stream {
                    return Err(injected("open_stream"));
                }
                let Some(detail) = guard.conversations.get_mut(&conversation_id) else {
                    return Err(ApiError::NotFound(conversation_id));
                };
                detail.messages.push(Message::user(
                    content.clone(),
                    context.attachment_ids.clone(),
                ));
                if let Some(summary) = guard
                    .summaries
                    .iter_mut()
                    .find(|s| s.id == conversation_id)
                {
                    summary.message_count += 2;
                }
                guard.stream_requests.push(StreamRequest {
                    conversation_id: conversation_id.clone(),
                    content,
                    context,
                    mode,
                });
                guard.scripts.pop_front().unwrap_or_default()
            };

            let stream: EventStream = Box::pin(async_stream::stream! {
                for event in script.events {
                    // Give concurrent callers a chance to cancel between events
                    tokio::task::yield_now().await;
                    if token.is_cancelled() {
                        yield Err(ApiError::Cancelled);
                        return;
                    }
                    if let CouncilEvent::TitleComplete { title } = &event {
                        let mut guard = state.lock();
                        if let Some(summary) = guard.summaries.iter_mut().find(|s| s.id == conversation_id) {
                            summary.title = title.clone();
                        }
                    }
                    let terminal = event.is_terminal();
                    yield Ok(event);
                    if terminal {
                        return;
                    }
                }
                if let Some(body) = script.transport_error {
                    yield Err(ApiError::Status { status: 502, body });
                    return;
                }
                if script.hold_open {
                    token.cancelled().await;
                    yield Err(ApiError::Cancelled);
                }
            });
            Ok(stream)
        })
    }
}

impl CouncilApi for InMemoryCouncilApi {
    fn create_conversation(
        &self,
        _business_id: Option<String>,
    ) -> BoxFuture<'static, ApiResult<CreatedConversation>> {
        let result = {
            let mut state = self.state.lock();
            state.create_calls += 1;
            if state.failures.create {
                Err(injected("create"))
            } else {
                state.next_id += 1;
                let created = CreatedConversation {
                    id: format!("conv-{}", state.next_id),
                    created_at: Utc::now(),
                };
                state.conversations.insert(
                    created.id.clone(),
                    ConversationDetail {
                        id: created.id.clone(),
                        title: None,
                        created_at: created.created_at,
                        messages: Vec::new(),
                    },
                );
                state.summaries.insert(
                    0,
                    ConversationSummary {
                        id: created.id.clone(),
                        title: crate::models::conversation::DEFAULT_TITLE.to_string(),
                        created_at: created.created_at,
                        message_count: 0,
                        is_starred: false,
                        is_archived: false,
                    },
                );
                Ok(created)
            }
        };
        Box::pin(async move { result })
    }

    fn list_conversations(
        &self,
        query: ListQuery,
    ) -> BoxFuture<'static, ApiResult<ConversationPage>> {
        let mut matching: Vec<ConversationSummary> = {
            let state = self.state.lock();
            let needle = query.search.as_deref().map(str::to_lowercase);
            state
                .summaries
                .iter()
                .filter(|s| match &needle {
                    Some(needle) => s.title.to_lowercase().contains(needle.as_str()),
                    None => true,
                })
                .cloned()
                .collect()
        };

        if query.sort_by == SortBy::Activity {
            matching.sort_by_key(|s| Reverse(s.message_count));
        }

        let has_more = matching.len() > query.offset + query.limit;
        let items = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        Box::pin(async move { Ok(ConversationPage { items, has_more }) })
    }

    fn get_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<ConversationDetail>> {
        let result = {
            let state = self.state.lock();
            match state.conversations.get(id) {
                Some(detail) => {
                    let mut detail = detail.clone();
                    if let Some(summary) = state.summaries.iter().find(|s| s.id == id) {
                        detail.title = Some(summary.title.clone());
                    }
                    Ok(detail)
                }
                None => Err(ApiError::NotFound(id.to_string())),
            }
        };
        Box::pin(async move { result })
    }

    fn archive_conversation(&self, id: &str, archived: bool) -> BoxFuture<'static, ApiResult<()>> {
        let failing = self.state.lock().failures.archive;
        self.update_summary(id, failing, "archive", |s| s.is_archived = archived)
    }

    fn star_conversation(&self, id: &str, starred: bool) -> BoxFuture<'static, ApiResult<()>> {
        let failing = self.state.lock().failures.star;
        self.update_summary(id, failing, "star", |s| s.is_starred = starred)
    }

    fn rename_conversation(&self, id: &str, title: &str) -> BoxFuture<'static, ApiResult<()>> {
        let failing = self.state.lock().failures.rename;
        let title = title.to_string();
        self.update_summary(id, failing, "rename", move |s| s.title = title)
    }

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<()>> {
        let result = {
            let mut state = self.state.lock();
            state.summaries.retain(|s| s.id != id);
            match state.conversations.remove(id) {
                Some(_) => Ok(()),
                None => Err(ApiError::NotFound(id.to_string())),
            }
        };
        Box::pin(async move { result })
    }

    fn bulk_delete_conversations(
        &self,
        ids: Vec<String>,
    ) -> BoxFuture<'static, ApiResult<BulkDeleteResult>> {
        let result = {
            let mut state = self.state.lock();
            state.bulk_delete_calls.push(ids.clone());
            if state.failures.bulk_delete {
                Err(injected("bulk_delete"))
            } else {
                state.summaries.retain(|s| !ids.contains(&s.id));
                let deleted = ids
                    .into_iter()
                    .filter(|id| state.conversations.remove(id).is_some())
                    .collect();
                Ok(BulkDeleteResult { deleted })
            }
        };
        Box::pin(async move { result })
    }

    fn upload_attachment(
        &self,
        file: AttachmentFile,
    ) -> BoxFuture<'static, ApiResult<UploadedAttachment>> {
        let result = if self.state.lock().failures.upload {
            Err(injected("upload"))
        } else {
            Ok(UploadedAttachment {
                id: format!("att-{}", file.file_name),
            })
        };
        Box::pin(async move { result })
    }

    fn open_council_stream(
        &self,
        conversation_id: &str,
        content: &str,
        context: StreamContext,
        token: CancellationToken,
    ) -> BoxFuture<'static, ApiResult<EventStream>> {
        self.open_stream(conversation_id, content, context, TurnMode::Council, token)
    }

    fn open_chat_stream(
        &self,
        conversation_id: &str,
        content: &str,
        context: StreamContext,
        token: CancellationToken,
    ) -> BoxFuture<'static, ApiResult<EventStream>> {
        self.open_stream(conversation_id, content, context, TurnMode::Chat, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_create_then_list() {
        let api = InMemoryCouncilApi::new();
        let first = api.create_conversation(None).await.unwrap();
        let second = api.create_conversation(None).await.unwrap();

        let page = api
            .list_conversations(ListQuery {
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.items[0].id, second.id);
        assert!(page.has_more);
        assert_ne!(first.id, second.id);
        assert_eq!(api.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_stream_replays_script_until_terminal() {
        let api = InMemoryCouncilApi::new();
        let created = api.create_conversation(None).await.unwrap();
        api.push_script(StreamScript::new(vec![
            CouncilEvent::StageStart { stage: Stage::Three },
            CouncilEvent::TitleComplete {
                title: "Greeting".to_string(),
            },
            CouncilEvent::Complete,
            CouncilEvent::StageStart { stage: Stage::One },
        ]));

        let stream = api
            .open_chat_stream(&created.id, "hi", StreamContext::default(), CancellationToken::new())
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 3);
        let summary = api.summary(&created.id).unwrap();
        assert_eq!(summary.title, "Greeting");
        assert_eq!(summary.message_count, 2);
        assert_eq!(api.stream_requests()[0].mode, TurnMode::Chat);
    }

    #[tokio::test]
    async fn test_held_open_stream_ends_on_cancel() {
        let api = InMemoryCouncilApi::new();
        let created = api.create_conversation(None).await.unwrap();
        api.push_script(StreamScript::held_open(vec![CouncilEvent::StageStart {
            stage: Stage::One,
        }]));

        let token = CancellationToken::new();
        let mut stream = api
            .open_council_stream(&created.id, "hi", StreamContext::default(), token.clone())
            .await
            .unwrap();

        assert!(matches!(stream.next().await, Some(Ok(CouncilEvent::StageStart { .. }))));
        token.cancel();
        assert!(matches!(stream.next().await, Some(Err(ApiError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_broken_stream_yields_server_error() {
        let api = InMemoryCouncilApi::new();
        let created = api.create_conversation(None).await.unwrap();
        api.push_script(StreamScript::broken_after(
            vec![CouncilEvent::StageStart { stage: Stage::One }],
            "connection reset",
        ));

        let events: Vec<_> = api
            .open_council_stream(&created.id, "hi", StreamContext::default(), CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            Err(ApiError::Status { status: 502, body }) if body == "connection reset"
        ));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let api = InMemoryCouncilApi::new();
        api.set_failures(FailureToggles {
            create: true,
            ..Default::default()
        });
        assert!(matches!(
            api.create_conversation(None).await,
            Err(ApiError::Status { status: 500, .. })
        ));
    }
}
