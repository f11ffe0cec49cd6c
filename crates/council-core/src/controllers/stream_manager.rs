use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::ConversationKey;

/// How a stream ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    Completed,
    Cancelled,
    Error(String),
}

/// Per-conversation stream slot.
///
/// The StreamManager does NOT touch message content; folding events into the
/// conversation is the reducer's job. It only tracks cancellation and which
/// turn owns the slot.
#[derive(Debug)]
struct StreamState {
    token: CancellationToken,
    generation: u64,
}

/// What a turn gets back when it registers: the token to watch and the
/// generation that identifies its registration.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    pub key: ConversationKey,
    pub generation: u64,
    pub token: CancellationToken,
}

/// Centralized stream lifecycle manager.
///
/// Streams are keyed by the stable [`ConversationKey`], so a conversation
/// that gets its server id mid-turn keeps the same slot. A registration
/// counter tells an old turn apart from a newer one for the same
/// conversation: only the owner of the current registration can finalize it.
#[derive(Debug, Default)]
pub struct StreamManager {
    streams: HashMap<ConversationKey, StreamState>,
    next_generation: u64,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream for a conversation.
    /// If a stream already exists for this conversation, it is cancelled first.
    pub fn register_stream(&mut self, key: ConversationKey) -> StreamHandle {
        if let Some(existing) = self.streams.remove(&key) {
            existing.token.cancel();
            debug!(conv_key = %key, "Cancelled existing stream before registering new one");
        }

        self.next_generation += 1;
        let handle = StreamHandle {
            key,
            generation: self.next_generation,
            token: CancellationToken::new(),
        };

        self.streams.insert(
            key,
            StreamState {
                token: handle.token.clone(),
                generation: handle.generation,
            },
        );

        debug!(conv_key = %key, generation = handle.generation, "Stream registered");
        handle
    }

    /// Register only if nothing is streaming for `key` yet.
    pub fn try_register_stream(&mut self, key: ConversationKey) -> Option<StreamHandle> {
        if self.is_streaming(key) {
            return None;
        }
        Some(self.register_stream(key))
    }

    /// Gracefully stop a stream using its cancellation token.
    /// Returns false when nothing was streaming for `key`.
    pub fn stop_stream(&mut self, key: ConversationKey) -> bool {
        let Some(state) = self.streams.remove(&key) else {
            return false;
        };

        state.token.cancel();
        debug!(conv_key = %key, "Stream stopped gracefully");
        true
    }

    /// Release the slot held by `handle` once its turn is over.
    ///
    /// Returns false, leaving the manager untouched, when the slot was
    /// already released by a stop or taken over by a newer registration.
    pub fn finish_stream(&mut self, handle: &StreamHandle, status: StreamStatus) -> bool {
        match self.streams.get(&handle.key) {
            Some(state) if state.generation == handle.generation => {}
            Some(_) => {
                debug!(
                    conv_key = %handle.key,
                    generation = handle.generation,
                    "Stream slot owned by a newer turn, leaving it alone"
                );
                return false;
            }
            None => return false,
        }

        if let StreamStatus::Error(error) = &status {
            warn!(conv_key = %handle.key, error = %error, "Stream ended with error");
        }
        self.streams.remove(&handle.key);
        debug!(conv_key = %handle.key, status = ?status, "Stream finalized");
        true
    }

    /// Check if a conversation has an active stream.
    pub fn is_streaming(&self, key: ConversationKey) -> bool {
        self.streams.contains_key(&key)
    }
}
