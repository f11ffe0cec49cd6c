pub mod conversation;
pub mod conversation_summary;
pub mod council_event;
pub mod message;
pub mod notification_store;
pub mod stream_entry;
pub mod stream_request;

pub use conversation::{Conversation, ConversationDetail, ConversationId, ConversationKey};
pub use conversation_summary::{
    ConversationPage, ConversationSummary, ListQuery, SortBy, SummaryList,
};
pub use council_event::{CouncilEvent, EventDecodeError};
pub use message::{Message, Role, Stage, StageLoading};
pub use notification_store::{Notification, NotificationLevel, NotificationStore};
pub use stream_entry::{StreamEntry, StreamingAccumulator};
pub use stream_request::{AttachmentFile, StreamContext, TurnMode};
