//! Call state, snapshots and notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use super::events::ControlEvent;
use crate::transport::IceConnectionState;
use crate::types::VoiceSelection;

/// Lifecycle state of a call. Failures always land back in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CallState {
    #[default]
    Idle,
    Connecting,
    Active,
}

/// Result of a `start_call` invocation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new call was set up and is now active.
    Started,
    /// A call was already connecting or active; nothing was done.
    AlreadyInProgress,
}

/// Read-only copy of the session aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub state: CallState,
    pub voice: VoiceSelection,
    pub transcript: String,
    pub elapsed_seconds: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub has_peer_connection: bool,
    pub has_control_channel: bool,
    pub has_local_stream: bool,
}

impl CallSnapshot {
    /// No call resources are held.
    pub fn is_released(&self) -> bool {
        !self.has_peer_connection && !self.has_control_channel && !self.has_local_stream
    }
}

/// Notification broadcast to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(CallState),
    /// The transcript changed; carries the full current text.
    TranscriptUpdated(String),
    Tick { elapsed_seconds: u64 },
    Control(ControlEvent),
    ConnectivityDegraded(IceConnectionState),
    /// A call attempt failed; the message is suitable for showing to a user.
    Failed { message: String },
    CallEnded {
        transcript: String,
        elapsed_seconds: u64,
    },
}
