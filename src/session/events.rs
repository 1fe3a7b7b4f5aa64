//! Control channel events and transcript folding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CallError;

/// Inbound control channel event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlEvent {
    /// Incremental transcript text to append.
    TranscriptDelta { text: String },
    /// Authoritative full transcript of the utterance.
    TranscriptDone { text: String },
    SessionCreated { session_id: String },
    Error { message: String },
    /// Any other event kind; carried through, never an error.
    Unknown { event_type: String },
}

impl ControlEvent {
    /// Map a decoded payload to a typed event.
    ///
    /// Returns `None` when the payload has no string `type`, or when a
    /// transcript event lacks its text field.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let event_type = payload.get("type")?.as_str()?;
        match event_type {
            "response.audio_transcript.delta" | "transcript.delta" => {
                string_field(payload, "delta")
                    .or_else(|| string_field(payload, "text"))
                    .map(|text| Self::TranscriptDelta { text })
            }
            "response.audio_transcript.done" | "transcript.done" => {
                string_field(payload, "transcript")
                    .or_else(|| string_field(payload, "text"))
                    .map(|text| Self::TranscriptDone { text })
            }
            "session.created" => Some(Self::SessionCreated {
                session_id: string_at(payload, &["session", "id"])
                    .or_else(|| string_field(payload, "session_id"))
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
            "error" => Some(Self::Error {
                message: string_at(payload, &["error", "message"])
                    .or_else(|| string_field(payload, "message"))
                    .unwrap_or_else(|| "Realtime gateway error".to_string()),
            }),
            _ => Some(Self::Unknown {
                event_type: event_type.to_string(),
            }),
        }
    }

    pub fn is_transcript(&self) -> bool {
        matches!(
            self,
            Self::TranscriptDelta { .. } | Self::TranscriptDone { .. }
        )
    }
}

/// Decode one raw channel message, reporting why it was rejected.
pub fn parse_message(raw: &str) -> Result<ControlEvent, CallError> {
    let payload: Value = serde_json::from_str(raw)
        .map_err(|e| CallError::Parse(format!("Invalid JSON payload: {e}")))?;
    if !payload.get("type").is_some_and(Value::is_string) {
        return Err(CallError::Parse("Payload has no string `type` field".into()));
    }
    ControlEvent::from_payload(&payload)
        .ok_or_else(|| CallError::Parse("Transcript event is missing its text".into()))
}

/// Decode one raw channel message. Never fails: rejects are logged and dropped.
pub fn handle_message(raw: &str) -> Option<ControlEvent> {
    match parse_message(raw) {
        Ok(ControlEvent::Unknown { event_type }) => {
            debug!(event_type = %event_type, "Ignoring unrecognized control event");
            Some(ControlEvent::Unknown { event_type })
        }
        Ok(event) => Some(event),
        Err(error) => {
            warn!(error = %error, payload_len = raw.len(), "Dropping control channel message");
            None
        }
    }
}

/// Fold an event into the running transcript.
///
/// Deltas append; a done event replaces the whole text.
pub fn apply_event(mut transcript: String, event: &ControlEvent) -> String {
    match event {
        ControlEvent::TranscriptDelta { text } => {
            transcript.push_str(text);
            transcript
        }
        ControlEvent::TranscriptDone { text } => text.clone(),
        _ => transcript,
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str().map(ToString::to_string)
}
