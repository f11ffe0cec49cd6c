//! Server-Sent Events framing for council streams.
//!
//! The transport hands over raw byte chunks as they arrive; chunks may end in
//! the middle of a line or even in the middle of a UTF-8 sequence. The
//! decoder buffers bytes until a full line is available and yields the
//! payload of every `data:` line.

use tracing::{debug, warn};

use crate::models::{CouncilEvent, EventDecodeError};

/// Line-buffered SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Set after an oversized line was dropped; its tail is discarded up to
    /// the next newline
    discarding: bool,
}

impl SseDecoder {
    /// Upper bound on a single buffered line (16MB)
    const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the data payloads of every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if let Some(data) = data_payload(&line) {
                frames.push(data);
            }
        }

        if self.buffer.len() > Self::MAX_BUFFER_SIZE {
            let event_type = event_type_hint(&self.buffer);
            warn!(
                event_type = event_type.as_deref().unwrap_or("unknown"),
                buffered = self.buffer.len(),
                "SSE line exceeded {}KB without a newline, dropping the event",
                Self::MAX_BUFFER_SIZE / 1024
            );
            self.buffer.clear();
            self.discarding = true;
        }

        frames
    }

    pub fn push_str(&mut self, s: &str) -> Vec<String> {
        self.push(s.as_bytes())
    }

    /// Flush a trailing line that was not newline-terminated when the
    /// connection closed.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        data_payload(&rest)
    }

    pub fn has_remaining(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// The `type` of a JSON event, read from the start of its line only.
fn event_type_hint(line: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(&line[..line.len().min(256)]);
    let (_, after) = head.split_once("\"type\"")?;
    let value = after.trim_start().strip_prefix(':')?.trim_start().strip_prefix('"')?;
    let (event_type, _) = value.split_once('"')?;
    Some(event_type.to_string())
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    // Comments (`:keep-alive`) and `event:`/`id:`/`retry:` fields carry nothing we use
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim().is_empty() {
        return None;
    }
    Some(data.to_string())
}

/// Decode one frame payload into an event.
///
/// Unknown event types are skipped at debug level so newer servers can add
/// events; anything else that fails to decode is skipped with a warning.
pub fn parse_event(data: &str) -> Option<CouncilEvent> {
    match CouncilEvent::from_json(data) {
        Ok(event) => Some(event),
        Err(EventDecodeError::UnknownType(kind)) => {
            debug!(kind = %kind, "Skipping unknown stream event");
            None
        }
        Err(e) => {
            warn!(error = %e, data = %preview(data), "Skipping malformed stream event");
            None
        }
    }
}

fn preview(data: &str) -> String {
    match data.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &data[..idx]),
        None => data.to_string(),
    }
}
