//! Settings for the credential-minting server.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::CallError;

use super::DEFAULT_MODEL;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8081";
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_INSTRUCTIONS: &str =
    "Keep your responses very short and to the point. Feel free to ask follow up questions.";

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Base URL; `/realtime/sessions` is appended.
    pub upstream_url: String,
    /// Bearer key for the upstream. Omitted from requests when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub instructions: String,
    pub upstream_timeout: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("instructions", &self.instructions)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            upstream_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `.env` and the process environment.
    pub fn from_env() -> Result<Self, CallError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Full URL of the upstream session-creation endpoint.
    pub fn sessions_url(&self) -> String {
        format!("{}/realtime/sessions", self.upstream_url.trim_end_matches('/'))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), CallError> {
        if let Some(addr) = lookup("QUICKCALL_BIND_ADDR") {
            self.bind_addr = addr.trim().parse().map_err(|e| {
                CallError::Configuration(format!("Invalid QUICKCALL_BIND_ADDR '{addr}': {e}"))
            })?;
        }
        if let Some(url) = lookup("QUICKCALL_UPSTREAM_URL") {
            self.upstream_url = url;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            let key = key.trim().to_string();
            self.api_key = (!key.is_empty()).then_some(key);
        }
        if let Some(model) = lookup("QUICKCALL_SESSION_MODEL") {
            self.model = model;
        }
        if let Some(instructions) = lookup("QUICKCALL_INSTRUCTIONS") {
            self.instructions = instructions;
        }
        if self.upstream_url.trim().is_empty() {
            return Err(CallError::Configuration(
                "Upstream URL cannot be empty".into(),
            ));
        }
        Ok(())
    }
}
