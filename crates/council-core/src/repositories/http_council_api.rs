use std::time::Duration;

use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::council_api::{
    BoxFuture, BulkDeleteResult, CouncilApi, CreatedConversation, EventStream,
    UploadedAttachment,
};
use super::error::{ApiError, ApiResult};
use crate::models::{
    AttachmentFile, ConversationDetail, ConversationPage, ListQuery, StreamContext,
};
use crate::services::sse_decoder::{SseDecoder, parse_event};
use crate::settings::ClientSettings;

/// [`CouncilApi`] over HTTP: JSON endpoints under `{base_url}/api` and
/// `text/event-stream` responses for turns.
#[derive(Clone)]
pub struct HttpCouncilApi {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    content: &'a str,
    #[serde(flatten)]
    context: &'a StreamContext,
}

impl HttpCouncilApi {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> ApiResult<Self> {
        // Only the connect phase is bounded client-wide; a council stream can
        // legitimately run for minutes.
        let client = Client::builder().connect_timeout(request_timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> ApiResult<Self> {
        Self::new(settings.base_url.clone(), settings.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .timeout(self.request_timeout)
    }

    fn send_json<T>(&self, request: RequestBuilder) -> BoxFuture<'static, ApiResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Box::pin(async move {
            let response = check_status(request.send().await?).await?;
            Ok(response.json::<T>().await?)
        })
    }

    fn send_empty(&self, request: RequestBuilder) -> BoxFuture<'static, ApiResult<()>> {
        Box::pin(async move {
            check_status(request.send().await?).await?;
            Ok(())
        })
    }

    fn open_stream(
        &self,
        path: String,
        content: &str,
        context: &StreamContext,
        token: CancellationToken,
    ) -> BoxFuture<'static, ApiResult<EventStream>> {
        let request = self
            .client
            .post(self.url(&path))
            .header(ACCEPT, "text/event-stream")
            .json(&MessageRequest { content, context });

        Box::pin(async move {
            let response = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ApiError::Cancelled),
                response = request.send() => response?,
            };
            let response = check_status(response).await?;
            debug!(path = %path, "Stream opened");
            Ok(event_stream(response, token))
        })
    }
}

async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Turn the response body into decoded events, stopping at the first
/// terminal event or as soon as `token` fires.
fn event_stream(response: Response, token: CancellationToken) -> EventStream {
    let mut body = Box::pin(response.bytes_stream());

    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };

            let Some(chunk) = next else {
                debug!("Stream read cancelled");
                yield Err(ApiError::Cancelled);
                return;
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for data in decoder.push(&bytes) {
                        if let Some(event) = parse_event(&data) {
                            let terminal = event.is_terminal();
                            yield Ok(event);
                            if terminal {
                                return;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Stream read failed");
                    yield Err(ApiError::Http(e));
                    return;
                }
                None => {
                    if let Some(event) = decoder.finish().as_deref().and_then(parse_event) {
                        yield Ok(event);
                    }
                    return;
                }
            }
        }
    })
}

impl CouncilApi for HttpCouncilApi {
    fn create_conversation(
        &self,
        business_id: Option<String>,
    ) -> BoxFuture<'static, ApiResult<CreatedConversation>> {
        let request = self
            .request(reqwest::Method::POST, "conversations")
            .json(&json!({ "business_id": business_id }));
        self.send_json(request)
    }

    fn list_conversations(
        &self,
        query: ListQuery,
    ) -> BoxFuture<'static, ApiResult<ConversationPage>> {
        let mut params = vec![
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
            ("sort_by", query.sort_by.as_str().to_string()),
        ];
        if let Some(search) = query.search.filter(|s| !s.trim().is_empty()) {
            params.push(("search", search));
        }

        let request = self
            .request(reqwest::Method::GET, "conversations")
            .query(&params);
        self.send_json(request)
    }

    fn get_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<ConversationDetail>> {
        let request = self.request(reqwest::Method::GET, &format!("conversations/{}", id));
        let id = id.to_string();

        Box::pin(async move {
            let response = request.send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound(id));
            }
            let response = check_status(response).await?;
            Ok(response.json::<ConversationDetail>().await?)
        })
    }

    fn archive_conversation(&self, id: &str, archived: bool) -> BoxFuture<'static, ApiResult<()>> {
        let request = self
            .request(reqwest::Method::POST, &format!("conversations/{}/archive", id))
            .json(&json!({ "archived": archived }));
        self.send_empty(request)
    }

    fn star_conversation(&self, id: &str, starred: bool) -> BoxFuture<'static, ApiResult<()>> {
        let request = self
            .request(reqwest::Method::POST, &format!("conversations/{}/star", id))
            .json(&json!({ "starred": starred }));
        self.send_empty(request)
    }

    fn rename_conversation(&self, id: &str, title: &str) -> BoxFuture<'static, ApiResult<()>> {
        let request = self
            .request(reqwest::Method::PATCH, &format!("conversations/{}/rename", id))
            .json(&json!({ "title": title }));
        self.send_empty(request)
    }

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<()>> {
        let request = self.request(reqwest::Method::DELETE, &format!("conversations/{}", id));
        self.send_empty(request)
    }

    fn bulk_delete_conversations(
        &self,
        ids: Vec<String>,
    ) -> BoxFuture<'static, ApiResult<BulkDeleteResult>> {
        let request = self
            .request(reqwest::Method::POST, "conversations/bulk-delete")
            .json(&json!({ "conversation_ids": ids }));
        self.send_json(request)
    }

    fn upload_attachment(
        &self,
        file: AttachmentFile,
    ) -> BoxFuture<'static, ApiResult<UploadedAttachment>> {
        let request = self.request(reqwest::Method::POST, "attachments/upload");

        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.mime_type)?;
            let form = reqwest::multipart::Form::new().part("file", part);

            let response = check_status(request.multipart(form).send().await?).await?;
            Ok(response.json::<UploadedAttachment>().await?)
        })
    }

    fn open_council_stream(
        &self,
        conversation_id: &str,
        content: &str,
        context: StreamContext,
        token: CancellationToken,
    ) -> BoxFuture<'static, ApiResult<EventStream>> {
        self.open_stream(
            format!("conversations/{}/message/stream", conversation_id),
            content,
            &context,
            token,
        )
    }

    fn open_chat_stream(
        &self,
        conversation_id: &str,
        content: &str,
        context: StreamContext,
        token: CancellationToken,
    ) -> BoxFuture<'static, ApiResult<EventStream>> {
        self.open_stream(
            format!("conversations/{}/chat/stream", conversation_id),
            content,
            &context,
            token,
        )
    }
}
