//! [`OfferAnswerer`] over the `webrtc` crate.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use webrtc::api::API;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::{GatewaySession, OfferAnswerer};
use crate::config::GatewayConfig;
use crate::error::CallError;
use crate::transport::webrtc::build_api;

/// Sent on every open control channel once per keepalive interval.
pub const KEEPALIVE: &str = r#"{"type":"ping"}"#;

/// Reply to each text message received on a control channel.
pub const ACKNOWLEDGEMENT: &str =
    r#"{"type":"response.audio_transcript.delta","delta":"I received your message"}"#;

/// Answers offers with one `RTCPeerConnection` per session.
pub struct WebRtcAnswerer {
    api: API,
    keepalive_interval: Duration,
    gather_timeout: Duration,
    peers: Mutex<HashMap<String, Arc<RTCPeerConnection>>>,
}

impl WebRtcAnswerer {
    pub fn new(config: &GatewayConfig) -> Result<Self, CallError> {
        Ok(Self {
            api: build_api()?,
            keepalive_interval: config.keepalive_interval,
            gather_timeout: config.gather_timeout,
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    async fn negotiate(
        &self,
        peer: &Arc<RTCPeerConnection>,
        session: &GatewaySession,
        offer_sdp: &str,
    ) -> Result<String, CallError> {
        self.bind_handlers(peer, session);

        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| CallError::Parse(format!("Invalid SDP offer: {e}")))?;
        peer.set_remote_description(offer)
            .await
            .map_err(|e| CallError::Parse(format!("Rejected SDP offer: {e}")))?;

        let answer = peer
            .create_answer(None)
            .await
            .map_err(|e| CallError::Transport(format!("Failed to create answer: {e}")))?;
        let mut gathering_complete = peer.gathering_complete_promise().await;
        peer.set_local_description(answer)
            .await
            .map_err(|e| CallError::Transport(format!("Failed to set local description: {e}")))?;
        if time::timeout(self.gather_timeout, gathering_complete.recv())
            .await
            .is_err()
        {
            debug!(session = %session.id, "ICE gathering incomplete; answering with candidates so far");
        }

        peer.local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| CallError::Transport("No local description after answer".into()))
    }

    fn bind_handlers(&self, peer: &Arc<RTCPeerConnection>, session: &GatewaySession) {
        let keepalive = self.keepalive_interval;
        let session_id = session.id.clone();
        peer.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let session_id = session_id.clone();
            Box::pin(async move {
                info!(session = %session_id, label = channel.label(), "Data channel established");
                spawn_keepalive(Arc::downgrade(&channel), keepalive);

                let replies = Arc::downgrade(&channel);
                channel.on_message(Box::new(move |msg: DataChannelMessage| {
                    let replies = replies.clone();
                    Box::pin(async move {
                        if !msg.is_string {
                            return;
                        }
                        debug!(bytes = msg.data.len(), "Control message received");
                        let Some(channel) = replies.upgrade() else {
                            return;
                        };
                        if let Err(error) = channel.send_text(ACKNOWLEDGEMENT.to_string()).await {
                            warn!(error = %error, "Failed to acknowledge control message");
                        }
                    })
                }));
            })
        }));

        let session_id = session.id.clone();
        let (process_audio, process_video) = (session.process_audio, session.process_video);
        peer.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let session_id = session_id.clone();
                let wanted = match track.kind() {
                    RTPCodecType::Audio => process_audio,
                    RTPCodecType::Video => process_video,
                    _ => false,
                };
                Box::pin(async move {
                    info!(session = %session_id, kind = ?track.kind(), wanted, "Track received");
                    if wanted {
                        tokio::spawn(drain_track(track, session_id));
                    }
                })
            },
        ));
    }
}

#[async_trait]
impl OfferAnswerer for WebRtcAnswerer {
    async fn answer(&self, session: &GatewaySession, offer_sdp: &str) -> Result<String, CallError> {
        let peer = Arc::new(
            self.api
                .new_peer_connection(RTCConfiguration::default())
                .await
                .map_err(|e| {
                    CallError::Transport(format!("Failed to create peer connection: {e}"))
                })?,
        );

        let answer = match self.negotiate(&peer, session, offer_sdp).await {
            Ok(answer) => answer,
            Err(error) => {
                close_peer(&peer, &session.id).await;
                return Err(error);
            }
        };

        let replaced = self
            .peers
            .lock()
            .await
            .insert(session.id.clone(), Arc::clone(&peer));
        if let Some(previous) = replaced {
            debug!(session = %session.id, "Replacing earlier connection for session");
            close_peer(&previous, &session.id).await;
        }
        Ok(answer)
    }

    async fn close_all(&self) {
        let peers: Vec<_> = self.peers.lock().await.drain().collect();
        for (session_id, peer) in peers {
            close_peer(&peer, &session_id).await;
        }
    }
}

async fn close_peer(peer: &RTCPeerConnection, session_id: &str) {
    if let Err(error) = peer.close().await {
        warn!(session = %session_id, error = %error, "Failed to close peer connection");
    }
}

fn spawn_keepalive(channel: Weak<RTCDataChannel>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(channel) = channel.upgrade() else {
                break;
            };
            match channel.ready_state() {
                RTCDataChannelState::Open => {
                    if let Err(error) = channel.send_text(KEEPALIVE.to_string()).await {
                        warn!(error = %error, "Keepalive send failed");
                        break;
                    }
                }
                RTCDataChannelState::Closing | RTCDataChannelState::Closed => break,
                _ => {}
            }
        }
    });
}

async fn drain_track(track: Arc<TrackRemote>, session_id: String) {
    let mut packets: u64 = 0;
    while track.read_rtp().await.is_ok() {
        packets += 1;
    }
    info!(session = %session_id, kind = ?track.kind(), packets, "Remote track ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SessionStatus;
    use crate::transport::webrtc::{SampleMediaDevices, WebRtcPeerFactory};
    use crate::transport::{
        MediaConstraints, MediaDevices, PeerConfiguration, PeerConnection, PeerConnectionFactory,
    };
    use chrono::Utc;

    fn session(id: &str) -> GatewaySession {
        GatewaySession {
            id: id.into(),
            model: "test".into(),
            voice: "alloy".into(),
            instructions: String::new(),
            process_audio: true,
            process_video: false,
            status: SessionStatus::Created,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn control_messages_are_json_events() {
        let ping: serde_json::Value = serde_json::from_str(KEEPALIVE).unwrap();
        assert_eq!(ping["type"], "ping");
        let ack: serde_json::Value = serde_json::from_str(ACKNOWLEDGEMENT).unwrap();
        assert_eq!(ack["type"], "response.audio_transcript.delta");
        assert_eq!(ack["delta"], "I received your message");
    }

    #[tokio::test]
    async fn answers_a_client_offer() {
        let config = GatewayConfig {
            gather_timeout: Duration::from_millis(200),
            ..GatewayConfig::default()
        };
        let answerer = WebRtcAnswerer::new(&config).expect("api should build");

        let client = WebRtcPeerFactory::new()
            .expect("api should build")
            .with_gather_timeout(None)
            .create_peer_connection(&PeerConfiguration::default())
            .await
            .expect("peer should be created");
        client
            .create_data_channel("oai-events", Arc::new(|_: String| {}))
            .await
            .expect("data channel should open");
        let stream = SampleMediaDevices
            .get_user_media(&MediaConstraints::default())
            .await
            .expect("capture should succeed");
        for track in stream.tracks() {
            client.add_track(Arc::clone(track)).await.expect("track should attach");
        }
        let offer = client.create_offer().await.expect("offer should be created");

        let answer = answerer
            .answer(&session("s1"), &offer.sdp)
            .await
            .expect("offer should be answered");

        assert!(answer.starts_with("v=0"));
        assert!(answer.contains("m=audio"));
        assert!(answer.contains("m=application"));
        assert_eq!(answerer.connection_count().await, 1);

        answerer.close_all().await;
        assert_eq!(answerer.connection_count().await, 0);
        client.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn malformed_offer_is_a_parse_error() {
        let answerer = WebRtcAnswerer::new(&GatewayConfig::default()).expect("api should build");

        let err = answerer
            .answer(&session("s2"), "not sdp")
            .await
            .expect_err("garbage should be rejected");

        assert!(matches!(err, CallError::Parse(_)));
        assert_eq!(answerer.connection_count().await, 0);
    }
}
