//! Call session lifecycle: `Idle → Connecting → Active → Idle`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::credential::{CredentialProvider, EphemeralCredentialClient};
use super::events::{self, ControlEvent};
use super::signaling::{SignalingExchange, SignalingProvider};
use super::state::{CallSnapshot, CallState, SessionEvent, StartOutcome};
use crate::config::ClientConfig;
use crate::error::CallError;
use crate::transport::{
    DataChannel, IceConnectionState, LocalMediaStream, MediaDevices, MessageHandler,
    PeerConfiguration, PeerConnection, PeerConnectionFactory, SessionDescription,
};
use crate::types::VoiceSelection;

const EVENT_CAPACITY: usize = 256;

/// Owns one call session and drives its transport.
///
/// At most one peer connection exists per manager. `start_call` while a call
/// is connecting or active is a no-op; `end_call` is safe from any state and
/// releases every resource before it returns. Dropping the manager tears the
/// call down as well.
pub struct CallSessionManager {
    shared: Arc<Shared>,
}

struct Shared {
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    signaling: Arc<dyn SignalingProvider>,
    peers: Arc<dyn PeerConnectionFactory>,
    media: Arc<dyn MediaDevices>,
    session: Mutex<CallSession>,
    /// Held by teardown until release finishes; a new call waits for it.
    lifecycle: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Default)]
struct CallSession {
    state: CallState,
    /// Id of the latest call attempt; callbacks carrying an older id are stale.
    attempt: u64,
    voice: VoiceSelection,
    peer_connection: Option<Arc<dyn PeerConnection>>,
    control_channel: Option<Arc<dyn DataChannel>>,
    local_stream: Option<LocalMediaStream>,
    transcript: String,
    elapsed_seconds: u64,
    started_at: Option<DateTime<Utc>>,
    ticker: Option<JoinHandle<()>>,
    setup_cancel: Option<CancellationToken>,
}

/// Everything taken out of a session by teardown.
struct Released {
    attempt: u64,
    previous_state: CallState,
    peer_connection: Option<Arc<dyn PeerConnection>>,
    control_channel: Option<Arc<dyn DataChannel>>,
    local_stream: Option<LocalMediaStream>,
    ticker: Option<JoinHandle<()>>,
    setup_cancel: Option<CancellationToken>,
    transcript: String,
    elapsed_seconds: u64,
}

impl CallSession {
    fn holds_resources(&self) -> bool {
        self.peer_connection.is_some()
            || self.control_channel.is_some()
            || self.local_stream.is_some()
            || self.ticker.is_some()
            || self.setup_cancel.is_some()
    }

    fn is_connecting(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.state == CallState::Connecting
    }

    fn is_live(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.state != CallState::Idle
    }

    fn release(&mut self) -> Released {
        self.started_at = None;
        Released {
            attempt: self.attempt,
            previous_state: std::mem::replace(&mut self.state, CallState::Idle),
            peer_connection: self.peer_connection.take(),
            control_channel: self.control_channel.take(),
            local_stream: self.local_stream.take(),
            ticker: self.ticker.take(),
            setup_cancel: self.setup_cancel.take(),
            transcript: std::mem::take(&mut self.transcript),
            elapsed_seconds: std::mem::take(&mut self.elapsed_seconds),
        }
    }

    fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            state: self.state,
            voice: self.voice,
            transcript: self.transcript.clone(),
            elapsed_seconds: self.elapsed_seconds,
            started_at: self.started_at,
            has_peer_connection: self.peer_connection.is_some(),
            has_control_channel: self.control_channel.is_some(),
            has_local_stream: self.local_stream.is_some(),
        }
    }
}

impl Released {
    /// Stop work that must not outlive the call: pending setup and the ticker.
    fn halt(&mut self) {
        if let Some(cancel) = self.setup_cancel.take() {
            cancel.cancel();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn stop_media(&mut self) {
        drop(self.control_channel.take());
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
    }
}

impl CallSessionManager {
    /// Create a manager from explicit collaborators.
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        signaling: Arc<dyn SignalingProvider>,
        peers: Arc<dyn PeerConnectionFactory>,
        media: Arc<dyn MediaDevices>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session = CallSession {
            voice: config.default_voice,
            ..Default::default()
        };
        Self {
            shared: Arc::new(Shared {
                config,
                credentials,
                signaling,
                peers,
                media,
                session: Mutex::new(session),
                lifecycle: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    /// Create a manager using the HTTP credential and signaling clients
    /// described by `config`.
    pub fn with_http(
        config: ClientConfig,
        peers: Arc<dyn PeerConnectionFactory>,
        media: Arc<dyn MediaDevices>,
    ) -> Result<Self, CallError> {
        config.validate()?;
        let credentials = EphemeralCredentialClient::new(config.session_url.clone())
            .with_timeout(config.credential_timeout);
        let signaling = SignalingExchange::new(config.gateway_url.clone())
            .with_model(config.model.clone())
            .with_timeout(config.signaling_timeout);
        Ok(Self::new(
            config,
            Arc::new(credentials),
            Arc::new(signaling),
            peers,
            media,
        ))
    }

    /// Create a manager over the `webrtc` crate with sample-fed capture.
    #[cfg(feature = "webrtc")]
    pub fn with_webrtc(config: ClientConfig) -> Result<Self, CallError> {
        use crate::transport::webrtc::{SampleMediaDevices, WebRtcPeerFactory};

        Self::with_http(
            config,
            Arc::new(WebRtcPeerFactory::new()?),
            Arc::new(SampleMediaDevices),
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Set up a call with the current voice.
    ///
    /// Returns `AlreadyInProgress` without side effects when a call is
    /// connecting or active. On failure every partially acquired resource is
    /// released, the state is back to `Idle`, and one
    /// [`SessionEvent::Failed`] is broadcast.
    pub async fn start_call(&self) -> Result<StartOutcome, CallError> {
        self.shared.start_call().await
    }

    /// Tear the call down. No-op when idle; aborts an in-flight setup.
    pub async fn end_call(&self) {
        if !self.shared.teardown(None).await {
            debug!("end_call with no call in progress");
        }
    }

    pub fn state(&self) -> CallState {
        self.shared.lock().state
    }

    pub fn voice(&self) -> VoiceSelection {
        self.shared.lock().voice
    }

    /// Change the voice for the next call. Rejected unless idle.
    pub fn set_voice(&self, voice: VoiceSelection) -> Result<(), CallError> {
        let mut session = self.shared.lock();
        if session.state != CallState::Idle {
            return Err(CallError::InvalidState(format!(
                "Voice cannot change while a call is {}",
                session.state
            )));
        }
        session.voice = voice;
        Ok(())
    }

    pub fn transcript(&self) -> String {
        self.shared.lock().transcript.clone()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.shared.lock().elapsed_seconds
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.shared.lock().snapshot()
    }

    /// Capture stream of the current call, e.g. for a preview surface.
    pub fn local_stream(&self) -> Option<LocalMediaStream> {
        self.shared.lock().local_stream.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Session notifications as a stream; lagged items are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|item| item.ok())
    }

    /// Send a client event over the control channel of the active call.
    pub async fn send_control_message(&self, payload: &Value) -> Result<(), CallError> {
        let channel = {
            let session = self.shared.lock();
            if session.state != CallState::Active {
                return Err(CallError::InvalidState(format!(
                    "Cannot send control message while {}",
                    session.state
                )));
            }
            session
                .control_channel
                .clone()
                .ok_or_else(|| CallError::InvalidState("Control channel is not open".into()))?
        };
        channel.send_text(payload.to_string()).await
    }
}

impl Drop for CallSessionManager {
    /// Releases like `end_call`, except the peer close is spawned rather
    /// than awaited. Subscribers still receive `Idle` and `CallEnded`.
    fn drop(&mut self) {
        let mut released = {
            let mut session = self.shared.lock();
            if session.state == CallState::Idle && !session.holds_resources() {
                return;
            }
            session.release()
        };
        released.halt();
        released.stop_media();
        if let Some(peer) = released.peer_connection.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(error) = peer.close().await {
                            warn!(error = %error, "Peer connection close on drop failed");
                        }
                    });
                }
                Err(_) => warn!("Dropped an active call outside a runtime; peer close skipped"),
            }
        }
        debug!(attempt = released.attempt, "Call released on drop");
        self.shared.announce(released);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CallSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn start_call(self: &Arc<Self>) -> Result<StartOutcome, CallError> {
        let transition = self.lifecycle.lock().await;
        let (attempt, voice, cancel) = {
            let mut session = self.lock();
            if session.state != CallState::Idle {
                debug!(state = %session.state, "start_call ignored: call already in progress");
                return Ok(StartOutcome::AlreadyInProgress);
            }
            session.attempt += 1;
            session.state = CallState::Connecting;
            session.transcript.clear();
            session.elapsed_seconds = 0;
            let cancel = CancellationToken::new();
            session.setup_cancel = Some(cancel.clone());
            self.emit(SessionEvent::StateChanged(CallState::Connecting));
            (session.attempt, session.voice, cancel)
        };
        drop(transition);
        info!(attempt, voice = %voice, "Starting call");

        match self.connect(attempt, voice, &cancel).await {
            Ok(()) if self.activate(attempt) => {
                info!(attempt, "Call active");
                Ok(StartOutcome::Started)
            }
            Ok(()) => {
                debug!(attempt, "Call ended before it became active");
                Err(CallError::Canceled)
            }
            Err(error) => {
                // Nothing left to tear down means end_call already did it.
                let torn_down = self.teardown(Some(attempt)).await;
                if !torn_down || matches!(error, CallError::Canceled) {
                    info!(attempt, error = %error, "Call setup canceled");
                    return Err(CallError::Canceled);
                }
                warn!(attempt, error = %error, "Call setup failed");
                self.emit(SessionEvent::Failed {
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn connect(
        self: &Arc<Self>,
        attempt: u64,
        voice: VoiceSelection,
        cancel: &CancellationToken,
    ) -> Result<(), CallError> {
        let credential = until_canceled(cancel, self.credentials.fetch_credential(voice)).await?;
        debug!(attempt, "Credential acquired");

        let peer_config = PeerConfiguration {
            ice_servers: self.config.ice_servers.clone(),
        };
        // Steps that acquire resources run to completion so that `adopt`
        // can release what they produced if the call ended meanwhile.
        let peer = self.peers.create_peer_connection(&peer_config).await?;
        if !self.adopt(attempt, |s| s.peer_connection = Some(Arc::clone(&peer))) {
            if let Err(error) = peer.close().await {
                debug!(error = %error, "Closing stale peer connection failed");
            }
            return Err(CallError::Canceled);
        }
        let weak = Arc::downgrade(self);
        peer.on_ice_connection_state_change(Arc::new(move |state: IceConnectionState| {
            if let Some(shared) = weak.upgrade() {
                shared.on_ice_state(attempt, state);
            }
        }));

        let weak = Arc::downgrade(self);
        let on_message: MessageHandler = Arc::new(move |raw: String| {
            if let Some(shared) = weak.upgrade() {
                shared.on_control_message(attempt, &raw);
            }
        });
        let channel = peer
            .create_data_channel(&self.config.control_channel_label, on_message)
            .await?;
        // The channel dies with the peer, which teardown already closed.
        if !self.adopt(attempt, |s| s.control_channel = Some(Arc::clone(&channel))) {
            return Err(CallError::Canceled);
        }
        debug!(attempt, label = channel.label(), "Control channel opened");

        let stream = self.media.get_user_media(&self.config.media).await?;
        if !self.adopt(attempt, |s| s.local_stream = Some(stream.clone())) {
            stream.stop_all();
            return Err(CallError::Canceled);
        }
        debug!(
            attempt,
            audio_tracks = stream.audio_tracks().count(),
            video_tracks = stream.video_tracks().count(),
            "Local media acquired"
        );

        for track in stream.tracks() {
            debug!(attempt, kind = %track.kind(), track = track.id(), "Adding local track");
            until_canceled(cancel, peer.add_track(Arc::clone(track))).await?;
        }

        let offer = until_canceled(cancel, peer.create_offer()).await?;
        until_canceled(cancel, peer.set_local_description(offer.clone())).await?;
        let offer_sdp = peer
            .local_description()
            .await
            .map(|description| description.sdp)
            .unwrap_or(offer.sdp);

        let answer = until_canceled(
            cancel,
            self.signaling
                .exchange_session_description(&credential, &offer_sdp),
        )
        .await?;
        debug!(attempt, answer_len = answer.len(), "SDP answer received");

        until_canceled(
            cancel,
            peer.set_remote_description(SessionDescription::answer(answer)),
        )
        .await
    }

    /// Store a freshly acquired resource if `attempt` is still connecting.
    fn adopt(&self, attempt: u64, store: impl FnOnce(&mut CallSession)) -> bool {
        let mut session = self.lock();
        if !session.is_connecting(attempt) {
            return false;
        }
        store(&mut session);
        true
    }

    fn activate(self: &Arc<Self>, attempt: u64) -> bool {
        let mut session = self.lock();
        if !session.is_connecting(attempt) {
            return false;
        }
        session.state = CallState::Active;
        session.elapsed_seconds = 0;
        session.started_at = Some(Utc::now());
        session.setup_cancel = None;
        session.ticker = Some(spawn_ticker(
            Arc::downgrade(self),
            attempt,
            self.config.tick_interval,
        ));
        self.emit(SessionEvent::StateChanged(CallState::Active));
        true
    }

    /// Release the session. With `only_attempt`, do nothing unless that
    /// attempt is still the current one. Returns whether anything was torn down.
    ///
    /// `Idle` is broadcast only after the peer is closed and the tracks are
    /// stopped.
    async fn teardown(&self, only_attempt: Option<u64>) -> bool {
        let _releasing = self.lifecycle.lock().await;
        let mut released = {
            let mut session = self.lock();
            if only_attempt.is_some_and(|attempt| attempt != session.attempt) {
                return false;
            }
            if session.state == CallState::Idle && !session.holds_resources() {
                return false;
            }
            session.release()
        };

        released.halt();
        if let Some(peer) = released.peer_connection.take() {
            if let Err(error) = peer.close().await {
                warn!(attempt = released.attempt, error = %error, "Peer connection close failed");
            }
        }
        released.stop_media();

        info!(
            attempt = released.attempt,
            previous_state = %released.previous_state,
            elapsed_seconds = released.elapsed_seconds,
            "Call torn down"
        );
        self.announce(released);
        true
    }

    fn announce(&self, released: Released) {
        self.emit(SessionEvent::StateChanged(CallState::Idle));
        if released.previous_state == CallState::Active {
            self.emit(SessionEvent::CallEnded {
                transcript: released.transcript,
                elapsed_seconds: released.elapsed_seconds,
            });
        }
    }

    fn on_control_message(&self, attempt: u64, raw: &str) {
        let Some(event) = events::handle_message(raw) else {
            return;
        };
        let updated = {
            let mut session = self.lock();
            if !session.is_live(attempt) {
                debug!(attempt, "Dropping control event for a finished call");
                return;
            }
            if event.is_transcript() {
                let current = std::mem::take(&mut session.transcript);
                session.transcript = events::apply_event(current, &event);
                Some(session.transcript.clone())
            } else {
                None
            }
        };
        if let ControlEvent::Error { message } = &event {
            warn!(attempt, message = %message, "Realtime gateway reported an error");
        }
        self.emit(SessionEvent::Control(event));
        if let Some(transcript) = updated {
            self.emit(SessionEvent::TranscriptUpdated(transcript));
        }
    }

    fn on_ice_state(&self, attempt: u64, state: IceConnectionState) {
        let active = {
            let session = self.lock();
            session.attempt == attempt && session.state == CallState::Active
        };
        if active && state.is_degraded() {
            // Reconnect policy is left to the caller.
            warn!(attempt, ice_state = %state, "ICE connectivity degraded");
            self.emit(SessionEvent::ConnectivityDegraded(state));
        } else {
            debug!(attempt, ice_state = %state, "ICE connection state changed");
        }
    }

    fn tick(&self, attempt: u64) -> Option<u64> {
        let mut session = self.lock();
        if session.attempt != attempt || session.state != CallState::Active {
            return None;
        }
        session.elapsed_seconds += 1;
        Some(session.elapsed_seconds)
    }
}

async fn until_canceled<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = Result<T, CallError>>,
) -> Result<T, CallError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CallError::Canceled),
        result = step => result,
    }
}

fn spawn_ticker(shared: Weak<Shared>, attempt: u64, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            match shared.tick(attempt) {
                Some(elapsed_seconds) => shared.emit(SessionEvent::Tick { elapsed_seconds }),
                None => break,
            }
        }
    })
}
