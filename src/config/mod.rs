//! Configuration system (layered: defaults < config file < env < code).

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "server")]
pub use server::ServerConfig;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "gateway")]
pub use gateway::GatewayConfig;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CallError;
use crate::transport::{IceServer, MediaConstraints, VideoConstraints};
use crate::types::VoiceSelection;

pub const DEFAULT_SESSION_URL: &str = "http://127.0.0.1:8081/api/session";
pub const DEFAULT_GATEWAY_URL: &str = "https://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini-realtime-preview-2024-12-17";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_CONTROL_CHANNEL_LABEL: &str = "oai-events";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Client-side configuration for a [`CallSessionManager`](crate::session::CallSessionManager).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Credential bootstrap endpoint (`GET ?voice=`).
    pub session_url: String,
    /// Realtime gateway signaling endpoint (`POST` raw SDP).
    pub gateway_url: String,
    /// Model id appended as `?model=` to the gateway URL, when set.
    pub model: Option<String>,
    pub ice_servers: Vec<IceServer>,
    pub control_channel_label: String,
    pub media: MediaConstraints,
    pub default_voice: VoiceSelection,
    pub credential_timeout: Duration,
    pub signaling_timeout: Duration,
    /// Period of the call duration ticker.
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_url: DEFAULT_SESSION_URL.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            model: Some(DEFAULT_MODEL.to_string()),
            ice_servers: vec![IceServer::new(DEFAULT_STUN_URL)],
            control_channel_label: DEFAULT_CONTROL_CHANNEL_LABEL.to_string(),
            media: MediaConstraints::default(),
            default_voice: VoiceSelection::default(),
            credential_timeout: Duration::from_secs(10),
            signaling_timeout: Duration::from_secs(15),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// On-disk representation; every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    session_url: Option<String>,
    gateway_url: Option<String>,
    model: Option<String>,
    ice_servers: Option<Vec<String>>,
    control_channel_label: Option<String>,
    voice: Option<VoiceSelection>,
    video: Option<bool>,
    credential_timeout_secs: Option<u64>,
    signaling_timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Load from environment variables (and `.env` if present) on top of defaults.
    pub fn from_env() -> Result<Self, CallError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a TOML config file on top of defaults, then apply the environment.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, CallError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&raw)?;
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse TOML config text on top of defaults (no environment).
    pub fn from_toml_str(raw: &str) -> Result<Self, CallError> {
        let file: ConfigFile = toml::from_str(raw)
            .map_err(|e| CallError::Configuration(format!("Invalid config file: {e}")))?;
        let mut config = Self::default();
        config.apply_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`~/.quickcall/config.toml`).
    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".quickcall"))
            .unwrap_or_else(|| PathBuf::from(".quickcall"))
            .join(CONFIG_FILE_NAME)
    }

    pub fn with_session_url(mut self, url: impl Into<String>) -> Self {
        self.session_url = url.into();
        self
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_voice(mut self, voice: VoiceSelection) -> Self {
        self.default_voice = voice;
        self
    }

    pub fn with_media(mut self, media: MediaConstraints) -> Self {
        self.media = media;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Reject configurations that could never establish a call.
    pub fn validate(&self) -> Result<(), CallError> {
        if self.session_url.trim().is_empty() {
            return Err(CallError::Configuration(
                "Session URL cannot be empty".into(),
            ));
        }
        if self.gateway_url.trim().is_empty() {
            return Err(CallError::Configuration(
                "Gateway URL cannot be empty".into(),
            ));
        }
        if self.ice_servers.iter().all(|server| server.urls.is_empty()) {
            return Err(CallError::Configuration(
                "At least one ICE server is required for NAT traversal".into(),
            ));
        }
        if !self.media.audio && self.media.video.is_none() {
            return Err(CallError::Configuration(
                "Media constraints must request audio or video".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(CallError::Configuration(
                "Tick interval must be positive".into(),
            ));
        }
        Ok(())
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(url) = file.session_url {
            self.session_url = url;
        }
        if let Some(url) = file.gateway_url {
            self.gateway_url = url;
        }
        if let Some(model) = file.model {
            self.model = non_empty(model);
        }
        if let Some(urls) = file.ice_servers {
            self.ice_servers = urls.into_iter().map(IceServer::new).collect();
        }
        if let Some(label) = file.control_channel_label {
            self.control_channel_label = label;
        }
        if let Some(voice) = file.voice {
            self.default_voice = voice;
        }
        if let Some(video) = file.video {
            self.media.video = video.then(VideoConstraints::default);
        }
        if let Some(secs) = file.credential_timeout_secs {
            self.credential_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.signaling_timeout_secs {
            self.signaling_timeout = Duration::from_secs(secs);
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), CallError> {
        if let Some(url) = lookup("QUICKCALL_SESSION_URL") {
            self.session_url = url;
        }
        if let Some(url) = lookup("QUICKCALL_GATEWAY_URL") {
            self.gateway_url = url;
        }
        if let Some(model) = lookup("QUICKCALL_MODEL") {
            self.model = non_empty(model);
        }
        if let Some(urls) = lookup("QUICKCALL_ICE_SERVERS") {
            self.ice_servers = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(IceServer::new)
                .collect();
        }
        if let Some(voice) = lookup("QUICKCALL_VOICE") {
            self.default_voice = VoiceSelection::from_str(voice.trim()).map_err(|_| {
                CallError::Configuration(format!("Unknown voice in QUICKCALL_VOICE: {voice}"))
            })?;
        }
        if let Some(flag) = lookup("QUICKCALL_ENABLE_VIDEO") {
            self.media.video = parse_flag(&flag).then(VideoConstraints::default);
        }
        self.validate()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
