use std::fmt;

use serde::{Deserialize, Serialize};

/// Track lifecycle state.
///
/// Tentative tracks confirm or retire, Confirmed tracks get lost (or are
/// flushed at end of stream), Lost tracks recover or retire. Retired is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Newly created track, not yet confirmed
    #[default]
    Tentative,
    /// Actively tracked object
    Confirmed,
    /// Temporarily lost, kept alive to survive occlusion
    Lost,
    /// Removed from tracking; never revived
    Retired,
}

impl TrackState {
    pub fn can_become(self, next: TrackState) -> bool {
        use TrackState::*;
        matches!(
            (self, next),
            (Tentative, Tentative | Confirmed | Retired)
                | (Confirmed, Confirmed | Lost | Retired)
                | (Lost, Confirmed | Retired)
        )
    }

    pub fn is_active(self) -> bool {
        self != TrackState::Retired
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tentative => "tentative",
            Self::Confirmed => "confirmed",
            Self::Lost => "lost",
            Self::Retired => "retired",
        }
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
