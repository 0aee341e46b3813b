use serde::Serialize;

/// Lifecycle of a track inside the tracker.
///
/// Confirmation is tracked separately (`STrack::is_confirmed`): a `Tracked`
/// track may still be tentative until it collects enough hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    #[default]
    New,
    /// Matched to a detection in the most recent frame.
    Tracked,
    /// Missed recently, still eligible for re-association.
    Lost,
    Removed,
}

impl TrackState {
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Tracked | Self::Lost)
    }
}
