//! Display helpers for call state.

/// Format an elapsed call duration as `MM:SS`.
///
/// Minutes keep growing past 59 rather than rolling into hours.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
