use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::ApiResult;
use crate::models::{
    AttachmentFile, ConversationDetail, ConversationPage, CouncilEvent, ListQuery, StreamContext,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Decoded events of one council or chat stream.
///
/// The stream ends after a terminal event, when the connection closes, or
/// with `Err(ApiError::Cancelled)` once the request token fires.
pub type EventStream = BoxStream<'static, ApiResult<CouncilEvent>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedConversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteResult {
    #[serde(default)]
    pub deleted: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedAttachment {
    pub id: String,
}

/// Everything the client needs from the council backend.
pub trait CouncilApi: Send + Sync + 'static {
    /// Create an empty conversation, optionally scoped to a business
    fn create_conversation(
        &self,
        business_id: Option<String>,
    ) -> BoxFuture<'static, ApiResult<CreatedConversation>>;

    fn list_conversations(&self, query: ListQuery)
    -> BoxFuture<'static, ApiResult<ConversationPage>>;

    fn get_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<ConversationDetail>>;

    fn archive_conversation(&self, id: &str, archived: bool) -> BoxFuture<'static, ApiResult<()>>;

    fn star_conversation(&self, id: &str, starred: bool) -> BoxFuture<'static, ApiResult<()>>;

    fn rename_conversation(&self, id: &str, title: &str) -> BoxFuture<'static, ApiResult<()>>;

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<()>>;

    fn bulk_delete_conversations(
        &self,
        ids: Vec<String>,
    ) -> BoxFuture<'static, ApiResult<BulkDeleteResult>>;

    fn upload_attachment(
        &self,
        file: AttachmentFile,
    ) -> BoxFuture<'static, ApiResult<UploadedAttachment>>;

    /// Open the three-stage council stream for one user message
    fn open_council_stream(
        &self,
        conversation_id: &str,
        content: &str,
        context: StreamContext,
        token: CancellationToken,
    ) -> BoxFuture<'static, ApiResult<EventStream>>;

    /// Open a single-model stream; the server only emits Stage 3 events
    fn open_chat_stream(
        &self,
        conversation_id: &str,
        content: &str,
        context: StreamContext,
        token: CancellationToken,
    ) -> BoxFuture<'static, ApiResult<EventStream>>;
}
