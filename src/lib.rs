//! quickcall: realtime voice calls over WebRTC
//!
//! Fetches a short-lived credential from a backend session endpoint,
//! negotiates a peer connection with the realtime gateway through an SDP
//! offer/answer exchange, and folds the control channel's transcript events
//! into a live transcript while the call is active.
//!
//! # Quick Start
//!
//! ```no_run
//! use quickcall::prelude::*;
//!
//! # async fn example() -> quickcall::error::Result<()> {
//! let manager = CallSessionManager::with_webrtc(ClientConfig::from_env()?)?;
//! manager.set_voice(VoiceSelection::Coral)?;
//! manager.start_call().await?;
//! println!("{}", manager.transcript());
//! manager.end_call().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod prelude;
pub mod session;
pub mod transport;
pub mod types;
pub mod util;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "cli")]
pub mod cli;
