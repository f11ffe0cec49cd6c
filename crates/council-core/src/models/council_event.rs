use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::message::Stage;

/// One event of a council (or chat) stream, already decoded from the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum CouncilEvent {
    StageStart {
        stage: Stage,
    },
    StageToken {
        stage: Stage,
        model: String,
        content: String,
    },
    ModelComplete {
        stage: Stage,
        model: String,
        response: String,
    },
    ModelError {
        stage: Stage,
        model: String,
        error: String,
    },
    StageComplete {
        stage: Stage,
        data: Value,
        metadata: Option<Value>,
    },
    ImageAnalysisComplete {
        analysis: String,
    },
    TitleComplete {
        title: String,
    },
    Complete,
    Error {
        message: String,
    },
    Cancelled,
}

impl CouncilEvent {
    /// Events after which the server sends nothing more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CouncilEvent::Complete | CouncilEvent::Error { .. } | CouncilEvent::Cancelled
        )
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EventDecodeError {
    #[error("Malformed event JSON: {0}")]
    Malformed(String),

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Event {kind} is missing field `{field}`")]
    MissingField { kind: String, field: &'static str },
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

fn string_field(payload: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match payload.get(*name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

fn required(
    payload: &Map<String, Value>,
    kind: &str,
    field: &'static str,
    aliases: &[&str],
) -> Result<String, EventDecodeError> {
    let mut names = vec![field];
    names.extend_from_slice(aliases);
    string_field(payload, &names).ok_or_else(|| EventDecodeError::MissingField {
        kind: kind.to_string(),
        field,
    })
}

/// Split `stage2_model_complete` into (`Stage::Two`, `"model_complete"`).
fn split_stage(kind: &str) -> Option<(Stage, &str)> {
    let rest = kind.strip_prefix("stage")?;
    let (number, action) = rest.split_once('_')?;
    let stage = Stage::from_number(number.parse().ok()?)?;
    Some((stage, action))
}

/// Contributor id of a stage event. Stage 3 has a single synthesizer, so a
/// missing id there falls back to a fixed name.
fn model_field(
    payload: &Map<String, Value>,
    kind: &str,
    stage: Stage,
) -> Result<String, EventDecodeError> {
    match string_field(payload, &["model", "contributor"]) {
        Some(model) => Ok(model),
        None if stage == Stage::Three => Ok("chairman".to_string()),
        None => Err(EventDecodeError::MissingField {
            kind: kind.to_string(),
            field: "model",
        }),
    }
}

impl CouncilEvent {
    /// Decode one JSON event as carried in a stream frame.
    pub fn from_json(json: &str) -> Result<Self, EventDecodeError> {
        let raw: RawEvent =
            serde_json::from_str(json).map_err(|e| EventDecodeError::Malformed(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_value(value: Value) -> Result<Self, EventDecodeError> {
        let raw: RawEvent = serde_json::from_value(value)
            .map_err(|e| EventDecodeError::Malformed(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawEvent) -> Result<Self, EventDecodeError> {
        let kind = raw.kind.as_str();
        let payload = &raw.payload;

        match kind {
            "complete" => return Ok(CouncilEvent::Complete),
            "cancelled" => return Ok(CouncilEvent::Cancelled),
            "error" => {
                let message = string_field(payload, &["message", "error"])
                    .unwrap_or_else(|| "Unknown error".to_string());
                return Ok(CouncilEvent::Error { message });
            }
            "title_complete" => {
                let title = match payload.get("data") {
                    Some(Value::Object(data)) => string_field(data, &["title"]),
                    _ => None,
                }
                .or_else(|| string_field(payload, &["title"]))
                .ok_or_else(|| EventDecodeError::MissingField {
                    kind: kind.to_string(),
                    field: "title",
                })?;
                return Ok(CouncilEvent::TitleComplete { title });
            }
            "image_analysis_complete" => {
                let analysis = required(payload, kind, "analysis", &["data", "content"])?;
                return Ok(CouncilEvent::ImageAnalysisComplete { analysis });
            }
            _ => {}
        }

        let Some((stage, action)) = split_stage(kind) else {
            return Err(EventDecodeError::UnknownType(kind.to_string()));
        };

        match action {
            "start" => Ok(CouncilEvent::StageStart { stage }),
            "token" => Ok(CouncilEvent::StageToken {
                stage,
                model: model_field(payload, kind, stage)?,
                content: required(payload, kind, "content", &["token", "delta"])?,
            }),
            "model_complete" => Ok(CouncilEvent::ModelComplete {
                stage,
                model: model_field(payload, kind, stage)?,
                response: string_field(payload, &["response", "content", "text"])
                    .unwrap_or_default(),
            }),
            "model_error" => Ok(CouncilEvent::ModelError {
                stage,
                model: model_field(payload, kind, stage)?,
                error: string_field(payload, &["error", "message"])
                    .unwrap_or_else(|| "Unknown error".to_string()),
            }),
            "complete" => Ok(CouncilEvent::StageComplete {
                stage,
                data: payload.get("data").cloned().unwrap_or(Value::Null),
                metadata: payload.get("metadata").cloned().filter(|m| !m.is_null()),
            }),
            _ => Err(EventDecodeError::UnknownType(kind.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_stage_events() {
        assert_eq!(
            CouncilEvent::from_json(r#"{"type":"stage2_start"}"#).unwrap(),
            CouncilEvent::StageStart { stage: Stage::Two }
        );
        assert_eq!(
            CouncilEvent::from_json(r#"{"type":"stage1_token","model":"gpt","content":"Hi"}"#)
                .unwrap(),
            CouncilEvent::StageToken {
                stage: Stage::One,
                model: "gpt".to_string(),
                content: "Hi".to_string(),
            }
        );
        assert_eq!(
            CouncilEvent::from_json(
                r#"{"type":"stage1_model_error","model":"gemini","error":"timeout"}"#
            )
            .unwrap(),
            CouncilEvent::ModelError {
                stage: Stage::One,
                model: "gemini".to_string(),
                error: "timeout".to_string(),
            }
        );
    }

    #[test]
    fn test_stage_complete_carries_data_and_metadata() {
        let event = CouncilEvent::from_value(json!({
            "type": "stage2_complete",
            "data": [{"model": "a", "ranking": "..."}],
            "metadata": {"aggregate_rankings": []}
        }))
        .unwrap();

        match event {
            CouncilEvent::StageComplete {
                stage,
                data,
                metadata,
            } => {
                assert_eq!(stage, Stage::Two);
                assert!(data.is_array());
                assert_eq!(metadata, Some(json!({"aggregate_rankings": []})));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_stage3_token_without_model_uses_chairman() {
        let event =
            CouncilEvent::from_json(r#"{"type":"stage3_token","content":"Final"}"#).unwrap();
        assert_eq!(
            event,
            CouncilEvent::StageToken {
                stage: Stage::Three,
                model: "chairman".to_string(),
                content: "Final".to_string(),
            }
        );
    }

    #[test]
    fn test_title_complete_nested_or_flat() {
        let nested =
            CouncilEvent::from_json(r#"{"type":"title_complete","data":{"title":"Canada"}}"#)
                .unwrap();
        let flat = CouncilEvent::from_json(r#"{"type":"title_complete","title":"Canada"}"#)
            .unwrap();
        let expected = CouncilEvent::TitleComplete {
            title: "Canada".to_string(),
        };
        assert_eq!(nested, expected);
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_rejects_unknown_and_incomplete_events() {
        assert_eq!(
            CouncilEvent::from_json(r#"{"type":"stage4_start"}"#),
            Err(EventDecodeError::UnknownType("stage4_start".to_string()))
        );
        assert_eq!(
            CouncilEvent::from_json(r#"{"type":"heartbeat"}"#),
            Err(EventDecodeError::UnknownType("heartbeat".to_string()))
        );
        assert!(matches!(
            CouncilEvent::from_json(r#"{"type":"stage1_token","content":"x"}"#),
            Err(EventDecodeError::MissingField { field: "model", .. })
        ));
        assert!(matches!(
            CouncilEvent::from_json("not json"),
            Err(EventDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_terminal_events() {
        assert!(CouncilEvent::Complete.is_terminal());
        assert!(CouncilEvent::Cancelled.is_terminal());
        assert!(
            CouncilEvent::Error {
                message: "x".to_string()
            }
            .is_terminal()
        );
        assert!(!CouncilEvent::StageStart { stage: Stage::One }.is_terminal());
    }
}
