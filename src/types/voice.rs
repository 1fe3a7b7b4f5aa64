//! Synthetic voice selection.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Voice used by the realtime gateway for spoken responses.
///
/// The gateway rejects a voice change once it has produced any audio, so a
/// selection is fixed for the lifetime of a call.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VoiceSelection {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl VoiceSelection {
    /// Every selectable voice, in menu order.
    pub const ALL: [VoiceSelection; 8] = [
        Self::Alloy,
        Self::Ash,
        Self::Ballad,
        Self::Coral,
        Self::Echo,
        Self::Sage,
        Self::Shimmer,
        Self::Verse,
    ];

    /// Wire identifier, e.g. `"coral"`.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Capitalised label, e.g. `"Coral"`.
    pub fn display_name(self) -> String {
        let id = self.as_str();
        let mut chars = id.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }
}
