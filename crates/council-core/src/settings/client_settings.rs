use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::TurnMode;

fn default_base_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_undo_window_ms() -> u64 {
    5000
}

fn default_page_size() -> usize {
    20
}

fn default_provisional_title_max_chars() -> usize {
    60
}

/// Client configuration, loaded from `settings.json`.
///
/// Every field has a default so older or hand-written files with missing
/// keys still load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for plain JSON requests. Streams are not bounded by it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long a bulk deletion can be undone before it is sent
    #[serde(default = "default_undo_window_ms")]
    pub undo_window_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_provisional_title_max_chars")]
    pub provisional_title_max_chars: usize,
    #[serde(default)]
    pub default_mode: TurnMode,
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            undo_window_ms: default_undo_window_ms(),
            page_size: default_page_size(),
            provisional_title_max_chars: default_provisional_title_max_chars(),
            default_mode: TurnMode::default(),
        }
    }
}
