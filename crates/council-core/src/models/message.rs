use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::stream_entry::{StreamEntry, StreamingAccumulator};

/// The three phases of a council turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Independent drafts from every contributor
    One,
    /// Cross-evaluation of the drafts
    Two,
    /// Final synthesis
    Three,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::One, Stage::Two, Stage::Three];

    pub fn number(self) -> u8 {
        match self {
            Stage::One => 1,
            Stage::Two => 2,
            Stage::Three => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Stage::One),
            2 => Some(Stage::Two),
            3 => Some(Stage::Three),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Which stages of an assistant message are still producing output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageLoading {
    pub stage1: bool,
    pub stage2: bool,
    pub stage3: bool,
}

impl StageLoading {
    pub fn get(&self, stage: Stage) -> bool {
        match stage {
            Stage::One => self.stage1,
            Stage::Two => self.stage2,
            Stage::Three => self.stage3,
        }
    }

    pub fn set(&mut self, stage: Stage, loading: bool) {
        match stage {
            Stage::One => self.stage1 = loading,
            Stage::Two => self.stage2 = loading,
            Stage::Three => self.stage3 = loading,
        }
    }

    pub fn any(&self) -> bool {
        self.stage1 || self.stage2 || self.stage3
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One entry of a conversation.
///
/// User messages carry `content`. Assistant messages carry the per-stage
/// results once the server finalizes them, plus client-only streaming
/// buffers and loading flags that are never serialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_ids: Vec<String>,
    #[serde(default, rename = "stage1", skip_serializing_if = "Option::is_none")]
    pub stage1_result: Option<Value>,
    #[serde(default, rename = "stage2", skip_serializing_if = "Option::is_none")]
    pub stage2_result: Option<Value>,
    #[serde(default, rename = "metadata", skip_serializing_if = "Option::is_none")]
    pub stage2_metadata: Option<Value>,
    #[serde(default, rename = "stage3", skip_serializing_if = "Option::is_none")]
    pub stage3_result: Option<Value>,
    #[serde(skip)]
    pub stage1_streaming: StreamingAccumulator,
    #[serde(skip)]
    pub stage2_streaming: StreamingAccumulator,
    #[serde(skip)]
    pub stage3_streaming: Option<StreamEntry>,
    #[serde(skip)]
    pub loading: StageLoading,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_analysis: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, attachment_ids: Vec<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::User,
            content: Some(content.into()),
            attachment_ids,
            stage1_result: None,
            stage2_result: None,
            stage2_metadata: None,
            stage3_result: None,
            stage1_streaming: StreamingAccumulator::new(),
            stage2_streaming: StreamingAccumulator::new(),
            stage3_streaming: None,
            loading: StageLoading::default(),
            stopped: false,
            image_analysis: None,
        }
    }

    /// Optimistic assistant placeholder for a turn that has not streamed yet.
    /// `first_stage` is the stage the server will start with.
    pub fn assistant_placeholder(first_stage: Stage) -> Self {
        let mut message = Self::user(String::new(), Vec::new());
        message.role = Role::Assistant;
        message.content = None;
        message.loading.set(first_stage, true);
        message
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn stage_result(&self, stage: Stage) -> Option<&Value> {
        match stage {
            Stage::One => self.stage1_result.as_ref(),
            Stage::Two => self.stage2_result.as_ref(),
            Stage::Three => self.stage3_result.as_ref(),
        }
    }

    /// Text the UI should show for Stage 3 right now: the streamed
    /// synthesis while in flight, the final payload's `response` afterwards.
    pub fn synthesis_text(&self) -> Option<&str> {
        if let Some(result) = &self.stage3_result {
            return result
                .get("response")
                .and_then(Value::as_str)
                .or_else(|| result.as_str());
        }
        self.stage3_streaming.as_ref().map(|entry| entry.text.as_str())
    }

    /// Force every stage out of the loading state and flag the message as
    /// stopped by the user.
    pub fn finalize_stopped(&mut self) {
        self.loading.clear();
        self.stopped = true;
    }
}
