//! Peer-to-peer transport seam driven by the call session manager.
//!
//! The manager only talks to these traits. The `webrtc` feature provides an
//! implementation on top of the `webrtc` crate; tests provide in-memory fakes.

pub mod media;

#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use media::{
    FacingMode, LocalMediaStream, LocalTrack, MediaConstraints, MediaDevices, TrackKind,
    VideoConstraints,
};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// ICE server (STUN or TURN) used for NAT traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Settings for a new peer connection.
#[derive(Debug, Clone, Default)]
pub struct PeerConfiguration {
    pub ice_servers: Vec<IceServer>,
}

/// Which side of the offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A typed SDP blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// `disconnected` or `failed`: media is no longer flowing reliably.
    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Callback for inbound text messages on a data channel.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Callback for ICE connection state changes.
pub type IceStateHandler = Arc<dyn Fn(IceConnectionState) + Send + Sync>;

/// Creates peer connections.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create_peer_connection(
        &self,
        config: &PeerConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, CallError>;
}

/// One peer connection. Closing it also destroys its data channels.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Open a data channel and bind `on_message` as its message handler.
    async fn create_data_channel(
        &self,
        label: &str,
        on_message: MessageHandler,
    ) -> Result<Arc<dyn DataChannel>, CallError>;

    fn on_ice_connection_state_change(&self, handler: IceStateHandler);

    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), CallError>;

    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    async fn set_local_description(&self, description: SessionDescription)
        -> Result<(), CallError>;

    /// Current local description, including any candidates gathered since
    /// [`PeerConnection::set_local_description`].
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), CallError>;

    /// Close the connection. Must be safe to call more than once.
    async fn close(&self) -> Result<(), CallError>;
}

/// Bidirectional control channel carried over a peer connection.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    async fn send_text(&self, text: String) -> Result<(), CallError>;
}
