//! Convenience re-exports for common use.

pub use crate::config::ClientConfig;
pub use crate::error::{CallError, ErrorCategory, Result};
pub use crate::session::{
    CallSessionManager, CallSnapshot, CallState, ControlEvent, Credential, CredentialProvider,
    EphemeralCredentialClient, SessionEvent, SignalingExchange, SignalingProvider, StartOutcome,
};
pub use crate::transport::{
    DataChannel, IceConnectionState, IceServer, LocalMediaStream, LocalTrack, MediaConstraints,
    MediaDevices, PeerConnection, PeerConnectionFactory,
};
pub use crate::types::VoiceSelection;
pub use crate::util::format_elapsed;
