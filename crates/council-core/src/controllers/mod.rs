pub mod client_state;
pub mod error;
pub mod identity;
pub mod list_sync;
pub mod session;
pub mod stream_manager;

pub use client_state::{ClientState, SharedState};
pub use error::{SessionError, SessionResult};
pub use identity::{IdentityManager, Promotion};
pub use list_sync::{DeletionHandle, DeletionPhase, ListSynchronizer, OptimisticCommand};
pub use session::CouncilSession;
pub use stream_manager::{StreamHandle, StreamManager, StreamStatus};
