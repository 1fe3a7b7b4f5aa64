//! Shared test helpers: in-memory transport, media and HTTP-free providers.
#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use quickcall::config::ClientConfig;
use quickcall::error::CallError;
use quickcall::session::{
    CallSessionManager, Credential, CredentialProvider, SessionEvent, SignalingProvider,
};
use quickcall::transport::{
    DataChannel, IceConnectionState, IceStateHandler, LocalMediaStream, LocalTrack,
    MediaConstraints, MediaDevices, MessageHandler, PeerConfiguration, PeerConnection,
    PeerConnectionFactory, SessionDescription, TrackKind,
};
use quickcall::types::VoiceSelection;

pub const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n";
pub const GATHERED_SUFFIX: &str = "a=end-of-candidates\r\n";
pub const ANSWER_SDP: &str = "v=0\r\no=gateway 2 2 IN IP4 0.0.0.0\r\n";

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

pub struct FakeCredentials {
    failure: Mutex<Option<String>>,
    voices: Mutex<Vec<VoiceSelection>>,
}

impl FakeCredentials {
    pub fn ok() -> Self {
        Self {
            failure: Mutex::new(None),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        let fake = Self::ok();
        fake.set_failure(Some(message));
        fake
    }

    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock().unwrap() = message.map(ToString::to_string);
    }

    pub fn voices(&self) -> Vec<VoiceSelection> {
        self.voices.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.voices.lock().unwrap().len()
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn fetch_credential(&self, voice: VoiceSelection) -> Result<Credential, CallError> {
        self.voices.lock().unwrap().push(voice);
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(CallError::Credential(message)),
            None => Ok(Credential::new("tok123")),
        }
    }
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum SignalingMode {
    Answer(String),
    Reject { status: u16, body: String },
    /// Never answers; used to end a call mid-setup.
    Hang,
}

pub struct FakeSignaling {
    mode: Mutex<SignalingMode>,
    offers: Mutex<Vec<(String, String)>>,
}

impl FakeSignaling {
    pub fn answering() -> Self {
        Self::with_mode(SignalingMode::Answer(ANSWER_SDP.to_string()))
    }

    pub fn with_mode(mode: SignalingMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            offers: Mutex::new(Vec::new()),
        }
    }

    /// `(token, offer sdp)` pairs received so far.
    pub fn offers(&self) -> Vec<(String, String)> {
        self.offers.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.offers.lock().unwrap().len()
    }
}

#[async_trait]
impl SignalingProvider for FakeSignaling {
    async fn exchange_session_description(
        &self,
        credential: &Credential,
        offer_sdp: &str,
    ) -> Result<String, CallError> {
        self.offers
            .lock()
            .unwrap()
            .push((credential.expose().to_string(), offer_sdp.to_string()));
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            SignalingMode::Answer(sdp) => Ok(sdp),
            SignalingMode::Reject { status, body } => {
                Err(CallError::signaling_status(status, body))
            }
            SignalingMode::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: &str, kind: TrackKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            stopped: AtomicBool::new(false),
        }
    }
}

impl LocalTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct FakeMediaDevices {
    failure: Option<String>,
    streams: Mutex<Vec<LocalMediaStream>>,
}

impl FakeMediaDevices {
    pub fn ok() -> Self {
        Self {
            failure: None,
            streams: Mutex::new(Vec::new()),
        }
    }

    pub fn denied(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            streams: Mutex::new(Vec::new()),
        }
    }

    /// Every stream handed out so far.
    pub fn streams(&self) -> Vec<LocalMediaStream> {
        self.streams.lock().unwrap().clone()
    }

    pub fn all_tracks_stopped(&self) -> bool {
        self.streams()
            .iter()
            .flat_map(|stream| stream.tracks().to_vec())
            .all(|track| track.is_stopped())
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, CallError> {
        if let Some(message) = &self.failure {
            return Err(CallError::MediaAcquisition(message.clone()));
        }
        let mut tracks: Vec<Arc<dyn LocalTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(FakeTrack::new("mic", TrackKind::Audio)));
        }
        if constraints.video.is_some() {
            tracks.push(Arc::new(FakeTrack::new("camera", TrackKind::Video)));
        }
        let stream = LocalMediaStream::new(tracks);
        self.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

/// Capture backend whose stream is handed over later through a channel,
/// like a permission prompt that resolves after the caller moved on.
pub struct DeferredMediaDevices {
    pending: Mutex<Option<oneshot::Receiver<LocalMediaStream>>>,
    requested: AtomicBool,
}

impl DeferredMediaDevices {
    pub fn new() -> (Self, oneshot::Sender<LocalMediaStream>) {
        let (tx, rx) = oneshot::channel();
        let devices = Self {
            pending: Mutex::new(Some(rx)),
            requested: AtomicBool::new(false),
        };
        (devices, tx)
    }

    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for DeferredMediaDevices {
    async fn get_user_media(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, CallError> {
        let rx = self
            .pending
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CallError::MediaAcquisition("capture already requested".into()))?;
        self.requested.store(true, Ordering::SeqCst);
        rx.await
            .map_err(|_| CallError::MediaAcquisition("capture abandoned".into()))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct FakeDataChannel {
    label: String,
    on_message: MessageHandler,
    sent: Mutex<Vec<String>>,
}

impl FakeDataChannel {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannel for FakeDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> Result<(), CallError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeer {
    pub ice_servers: Vec<String>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    tracks: Mutex<Vec<String>>,
    channel: Mutex<Option<Arc<FakeDataChannel>>>,
    ice_handler: Mutex<Option<IceStateHandler>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
}

impl FakePeer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn channel(&self) -> Option<Arc<FakeDataChannel>> {
        self.channel.lock().unwrap().clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    /// Simulate an inbound control channel message.
    pub fn deliver(&self, raw: &str) {
        if let Some(channel) = self.channel() {
            (channel.on_message)(raw.to_string());
        }
    }

    /// Simulate an ICE connection state transition.
    pub fn set_ice_state(&self, state: IceConnectionState) {
        let handler = self.ice_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_data_channel(
        &self,
        label: &str,
        on_message: MessageHandler,
    ) -> Result<Arc<dyn DataChannel>, CallError> {
        let channel = Arc::new(FakeDataChannel {
            label: label.to_string(),
            on_message,
            sent: Mutex::new(Vec::new()),
        });
        *self.channel.lock().unwrap() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    fn on_ice_connection_state_change(&self, handler: IceStateHandler) {
        *self.ice_handler.lock().unwrap() = Some(handler);
    }

    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), CallError> {
        self.tracks.lock().unwrap().push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        *self.local.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local
            .lock()
            .unwrap()
            .clone()
            .map(|d| SessionDescription::offer(format!("{}{GATHERED_SUFFIX}", d.sdp)))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        *self.remote.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn close(&self) -> Result<(), CallError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        // Real transports suspend while closing.
        tokio::task::yield_now().await;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.peers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a peer connection should have been created")
    }

    pub fn all_closed(&self) -> bool {
        self.peers.lock().unwrap().iter().all(|peer| peer.is_closed())
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create_peer_connection(
        &self,
        config: &PeerConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        let peer = Arc::new(FakePeer {
            ice_servers: config
                .ice_servers
                .iter()
                .flat_map(|server| server.urls.clone())
                .collect(),
            ..Default::default()
        });
        self.peers.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub manager: CallSessionManager,
    pub credentials: Arc<FakeCredentials>,
    pub signaling: Arc<FakeSignaling>,
    pub peers: Arc<FakePeerFactory>,
    pub media: Arc<FakeMediaDevices>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(
            ClientConfig::default(),
            FakeCredentials::ok(),
            FakeSignaling::answering(),
            FakeMediaDevices::ok(),
        )
    }

    pub fn build(
        config: ClientConfig,
        credentials: FakeCredentials,
        signaling: FakeSignaling,
        media: FakeMediaDevices,
    ) -> Self {
        let credentials = Arc::new(credentials);
        let signaling = Arc::new(signaling);
        let peers = Arc::new(FakePeerFactory::default());
        let media = Arc::new(media);
        let manager = CallSessionManager::new(
            config,
            credentials.clone(),
            signaling.clone(),
            peers.clone(),
            media.clone(),
        );
        Self {
            manager,
            credentials,
            signaling,
            peers,
            media,
        }
    }
}

/// Drain everything currently buffered on a subscription.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
