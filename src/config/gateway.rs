//! Settings for the local realtime gateway.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::CallError;

pub const DEFAULT_GATEWAY_BIND_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// Period of the `{"type":"ping"}` message on each control channel.
    pub keepalive_interval: Duration,
    /// How long an answer waits for ICE gathering before it is returned.
    pub gather_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            keepalive_interval: Duration::from_secs(10),
            gather_timeout: Duration::from_secs(2),
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `.env` and the process environment.
    pub fn from_env() -> Result<Self, CallError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), CallError> {
        if let Some(addr) = lookup("QUICKCALL_GATEWAY_BIND_ADDR") {
            self.bind_addr = addr.trim().parse().map_err(|e| {
                CallError::Configuration(format!(
                    "Invalid QUICKCALL_GATEWAY_BIND_ADDR '{addr}': {e}"
                ))
            })?;
        }
        if let Some(secs) = lookup("QUICKCALL_GATEWAY_KEEPALIVE_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                CallError::Configuration(format!(
                    "Invalid QUICKCALL_GATEWAY_KEEPALIVE_SECS '{secs}': {e}"
                ))
            })?;
            if secs == 0 {
                return Err(CallError::Configuration(
                    "Keepalive interval must be at least one second".into(),
                ));
            }
            self.keepalive_interval = Duration::from_secs(secs);
        }
        Ok(())
    }
}
