//! Client-side engine for multi-model council conversations.
//!
//! A [`CouncilSession`] sends a message, folds the streamed stage events
//! into an immutable conversation snapshot, and keeps the conversation list
//! in step with the server.

pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod settings;

pub use controllers::{CouncilSession, SessionError, SessionResult};
pub use models::{Conversation, ConversationSummary, CouncilEvent, Message, Stage, TurnMode};
pub use repositories::{ApiError, CouncilApi, HttpCouncilApi, InMemoryCouncilApi};
pub use services::TurnOutcome;
pub use settings::{ClientSettings, ContextSelectionStore};
