//! Shared domain types.

pub mod voice;

pub use voice::VoiceSelection;
