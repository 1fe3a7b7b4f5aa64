//! Transport backed by the `webrtc` crate.
//!
//! `webrtc` has no device capture, so [`SampleMediaDevices`] hands out
//! [`SampleTrack`]s that the application feeds with already-encoded frames
//! (Opus for audio, VP8 for video).

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::{
    DataChannel, IceConnectionState, IceStateHandler, LocalMediaStream, LocalTrack,
    MediaConstraints, MediaDevices, MessageHandler, PeerConfiguration, PeerConnection,
    PeerConnectionFactory, SdpKind, SessionDescription, TrackKind,
};
use crate::error::CallError;

const STREAM_ID: &str = "quickcall";
const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds peer connections from a shared `webrtc` API instance.
pub struct WebRtcPeerFactory {
    api: Arc<API>,
    gather_timeout: Option<Duration>,
}

impl WebRtcPeerFactory {
    /// Register default codecs and interceptors.
    pub fn new() -> Result<Self, CallError> {
        Ok(Self {
            api: Arc::new(build_api()?),
            gather_timeout: Some(DEFAULT_GATHER_TIMEOUT),
        })
    }

    /// How long `set_local_description` waits for ICE gathering before the
    /// offer is read back. `None` sends the offer without waiting.
    pub fn with_gather_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.gather_timeout = timeout;
        self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create_peer_connection(
        &self,
        config: &PeerConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer = self
            .api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| CallError::Transport(format!("Failed to create peer connection: {e}")))?;

        Ok(Arc::new(WebRtcPeerConnection {
            peer: Arc::new(peer),
            gather_timeout: self.gather_timeout,
            closed: AtomicBool::new(false),
        }))
    }
}

/// [`PeerConnection`] over an `RTCPeerConnection`.
pub struct WebRtcPeerConnection {
    peer: Arc<RTCPeerConnection>,
    gather_timeout: Option<Duration>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn create_data_channel(
        &self,
        label: &str,
        on_message: MessageHandler,
    ) -> Result<Arc<dyn DataChannel>, CallError> {
        let channel = self
            .peer
            .create_data_channel(label, None)
            .await
            .map_err(|e| CallError::Transport(format!("Failed to open data channel: {e}")))?;

        let channel_label = label.to_string();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let handler = Arc::clone(&on_message);
            let label = channel_label.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => handler(text),
                    Err(error) => {
                        warn!(channel = %label, error = %error, "Dropping non-UTF-8 data channel message");
                    }
                }
            })
        }));

        Ok(Arc::new(WebRtcDataChannel {
            label: label.to_string(),
            channel,
        }))
    }

    fn on_ice_connection_state_change(&self, handler: IceStateHandler) {
        self.peer
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                handler(map_ice_state(state));
                Box::pin(async {})
            }));
    }

    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), CallError> {
        let sample_track = track.as_any().downcast_ref::<SampleTrack>().ok_or_else(|| {
            CallError::Transport(format!(
                "Track {} was not produced by SampleMediaDevices",
                track.id()
            ))
        })?;

        let local: Arc<dyn TrackLocal + Send + Sync> = Arc::clone(&sample_track.inner) as _;
        let sender = self
            .peer
            .add_track(local)
            .await
            .map_err(|e| CallError::Transport(format!("Failed to add {} track: {e}", track.kind())))?;

        // RTCP must be drained for interceptors (NACK, reports) to run.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self
            .peer
            .create_offer(None)
            .await
            .map_err(|e| CallError::Transport(format!("Failed to create offer: {e}")))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        let rtc_description = to_rtc_description(description)?;
        let mut gathering_complete = self.peer.gathering_complete_promise().await;

        self.peer
            .set_local_description(rtc_description)
            .await
            .map_err(|e| CallError::Transport(format!("Failed to set local description: {e}")))?;

        if let Some(timeout) = self.gather_timeout {
            if tokio::time::timeout(timeout, gathering_complete.recv())
                .await
                .is_err()
            {
                debug!(
                    timeout_ms = timeout.as_millis() as u64,
                    "ICE gathering incomplete; sending offer with candidates gathered so far"
                );
            }
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.peer.local_description().await?;
        let kind = match description.sdp_type {
            RTCSdpType::Answer | RTCSdpType::Pranswer => SdpKind::Answer,
            _ => SdpKind::Offer,
        };
        Some(SessionDescription {
            kind,
            sdp: description.sdp,
        })
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        let rtc_description = to_rtc_description(description)?;
        self.peer
            .set_remote_description(rtc_description)
            .await
            .map_err(|e| CallError::Transport(format!("Failed to set remote description: {e}")))
    }

    async fn close(&self) -> Result<(), CallError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.peer
            .close()
            .await
            .map_err(|e| CallError::Transport(format!("Failed to close peer connection: {e}")))
    }
}

struct WebRtcDataChannel {
    label: String,
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> Result<(), CallError> {
        self.channel
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| CallError::Transport(format!("Data channel send failed: {e}")))
    }
}

/// Local track fed with encoded samples by the application.
pub struct SampleTrack {
    id: String,
    kind: TrackKind,
    inner: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
}

impl SampleTrack {
    fn new(kind: TrackKind) -> Self {
        let capability = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };
        let id = format!("{kind}-{}", Uuid::new_v4().simple());
        Self {
            inner: Arc::new(TrackLocalStaticSample::new(
                capability,
                id.clone(),
                STREAM_ID.to_string(),
            )),
            id,
            kind,
            stopped: AtomicBool::new(false),
        }
    }

    /// Write one encoded frame lasting `duration`.
    pub async fn write_sample(&self, data: &[u8], duration: Duration) -> Result<(), CallError> {
        if self.is_stopped() {
            return Err(CallError::InvalidState(format!(
                "Track {} has been stopped",
                self.id
            )));
        }
        self.inner
            .write_sample(&Sample {
                data: Bytes::copy_from_slice(data),
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| CallError::Transport(format!("Failed to write sample: {e}")))
    }
}

impl LocalTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(track = %self.id, kind = %self.kind, "Local track stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// [`MediaDevices`] producing [`SampleTrack`]s.
#[derive(Debug, Default, Clone)]
pub struct SampleMediaDevices;

#[async_trait]
impl MediaDevices for SampleMediaDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, CallError> {
        let mut tracks: Vec<Arc<dyn LocalTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(SampleTrack::new(TrackKind::Audio)));
        }
        if let Some(video) = &constraints.video {
            debug!(facing_mode = ?video.facing_mode, frame_rate = video.frame_rate, "Opening video track");
            tracks.push(Arc::new(SampleTrack::new(TrackKind::Video)));
        }
        if tracks.is_empty() {
            return Err(CallError::MediaAcquisition(
                "No audio or video track requested".into(),
            ));
        }
        Ok(LocalMediaStream::new(tracks))
    }
}

/// `webrtc` API with the default codecs and interceptors registered.
pub(crate) fn build_api() -> Result<API, CallError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| CallError::Transport(format!("Failed to register codecs: {e}")))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| CallError::Transport(format!("Failed to register interceptors: {e}")))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, CallError> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| CallError::Transport(format!("Invalid SDP: {e}")))
}

fn map_ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::VideoConstraints;

    #[tokio::test]
    async fn sample_devices_honor_constraints() {
        let devices = SampleMediaDevices;
        let stream = devices
            .get_user_media(&MediaConstraints {
                audio: true,
                video: Some(VideoConstraints::default()),
            })
            .await
            .expect("capture should succeed");

        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().count(), 1);

        let err = devices
            .get_user_media(&MediaConstraints {
                audio: false,
                video: None,
            })
            .await
            .expect_err("empty constraints should fail");
        assert!(matches!(err, CallError::MediaAcquisition(_)));
    }

    #[tokio::test]
    async fn stopped_track_rejects_samples() {
        let track = SampleTrack::new(TrackKind::Audio);
        track.stop();
        track.stop();
        let err = track
            .write_sample(&[0xf8, 0xff, 0xfe], Duration::from_millis(20))
            .await
            .expect_err("stopped track should reject writes");
        assert!(matches!(err, CallError::InvalidState(_)));
    }

    #[tokio::test]
    async fn peer_connection_produces_offer_with_data_channel() {
        let factory = WebRtcPeerFactory::new()
            .expect("api should build")
            .with_gather_timeout(None);
        let peer = factory
            .create_peer_connection(&PeerConfiguration::default())
            .await
            .expect("peer should be created");

        let channel = peer
            .create_data_channel("oai-events", Arc::new(|_: String| {}))
            .await
            .expect("data channel should open");
        assert_eq!(channel.label(), "oai-events");

        let stream = SampleMediaDevices
            .get_user_media(&MediaConstraints::default())
            .await
            .expect("capture should succeed");
        for track in stream.tracks() {
            peer.add_track(Arc::clone(track)).await.expect("track should attach");
        }

        let offer = peer.create_offer().await.expect("offer should be created");
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.starts_with("v=0"));
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=application"));

        peer.set_local_description(offer)
            .await
            .expect("local description should apply");
        assert!(peer.local_description().await.is_some());

        peer.close().await.expect("close should succeed");
        peer.close().await.expect("second close is a no-op");
    }
}
