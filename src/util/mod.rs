//! Utility modules: timeout, display formatting.

pub mod format;
pub mod timeout;

pub use format::format_elapsed;
