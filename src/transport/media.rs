//! Local media capture: constraints, tracks and streams.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CallError;

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Which camera to open for video capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    #[default]
    Environment,
}

/// Video capture request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub facing_mode: FacingMode,
    pub frame_rate: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::Environment,
            frame_rate: 30,
        }
    }
}

/// What to capture when a call starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: None,
        }
    }
}

impl MediaConstraints {
    /// Microphone plus back camera.
    pub fn audio_and_video() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::default()),
        }
    }
}

/// A captured local track.
///
/// Implementations expose themselves through [`LocalTrack::as_any`] so a
/// transport can recover its own concrete track type when attaching it.
pub trait LocalTrack: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Stop capturing. Idempotent.
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// A set of tracks acquired together from [`MediaDevices`].
#[derive(Clone)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<Arc<dyn LocalTrack>>,
}

impl fmt::Debug for LocalMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracks: Vec<_> = self
            .tracks
            .iter()
            .map(|t| format!("{}:{}", t.kind(), t.id()))
            .collect();
        f.debug_struct("LocalMediaStream")
            .field("id", &self.id)
            .field("tracks", &tracks)
            .finish()
    }
}

impl LocalMediaStream {
    pub fn new(tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn LocalTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<dyn LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    /// Stop every track in the stream.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Source of local capture streams (microphone, camera).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a stream satisfying `constraints`.
    ///
    /// Fails with [`CallError::MediaAcquisition`] when a device is denied or
    /// unavailable.
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, CallError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubTrack {
        id: String,
        kind: TrackKind,
        stopped: AtomicBool,
    }

    impl LocalTrack for StubTrack {
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

    fn stub(id: &str, kind: TrackKind) -> Arc<dyn LocalTrack> {
        Arc::new(StubTrack {
            id: id.to_string(),
            kind,
            stopped: AtomicBool::new(false),
        })
    }

    #[test]
    fn stream_filters_tracks_by_kind_and_stops_all() {
        let stream = LocalMediaStream::new(vec![
            stub("mic", TrackKind::Audio),
            stub("cam", TrackKind::Video),
        ]);

        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().next().map(|t| t.id()), Some("cam"));

        stream.stop_all();
        assert!(stream.tracks().iter().all(|t| t.is_stopped()));
    }

    #[test]
    fn default_constraints_capture_audio_only() {
        let constraints = MediaConstraints::default();
        assert!(constraints.audio);
        assert!(constraints.video.is_none());

        let both = MediaConstraints::audio_and_video();
        assert_eq!(
            both.video,
            Some(VideoConstraints {
                facing_mode: FacingMode::Environment,
                frame_rate: 30
            })
        );
    }
}
