pub mod council_api;
pub mod error;
pub mod http_council_api;
pub mod in_memory_council_api;

pub use council_api::{
    BoxFuture, BulkDeleteResult, CouncilApi, CreatedConversation, EventStream, UploadedAttachment,
};
pub use error::{ApiError, ApiResult};
pub use http_council_api::HttpCouncilApi;
pub use in_memory_council_api::{FailureToggles, InMemoryCouncilApi, StreamRequest, StreamScript};
