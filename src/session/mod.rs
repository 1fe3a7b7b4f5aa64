//! Call session: credential bootstrap, signaling, control events and the
//! lifecycle manager tying them to a transport.

pub mod credential;
pub mod events;
pub mod manager;
pub mod signaling;
pub mod state;

pub use credential::{extract_credential, Credential, CredentialProvider, EphemeralCredentialClient};
pub use events::{apply_event, handle_message, parse_message, ControlEvent};
pub use manager::CallSessionManager;
pub use signaling::{SignalingExchange, SignalingProvider};
pub use state::{CallSnapshot, CallState, SessionEvent, StartOutcome};
