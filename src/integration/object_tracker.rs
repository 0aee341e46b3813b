//! Frame-level tracker wrapper and the plain records reported per frame.

use serde::{Deserialize, Serialize};

use crate::integration::classes::UNKNOWN_CLASS;
use crate::tracker::{BYTETracker, Detection, STrack, TrackError, TrackerConfig};

/// JSON form of a detection: whole-pixel corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub bbox: [i32; 4],
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
}

impl From<&Detection> for DetectionRecord {
    fn from(det: &Detection) -> Self {
        Self {
            bbox: det.bbox.to_ltrb_pixels(),
            confidence: det.score,
            class_id: det.class_id,
            class_name: det.class_name.clone(),
        }
    }
}

/// JSON form of a confirmed track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: u64,
    pub class: String,
    pub bbox: [i32; 4],
}

/// Owns the tracker state for one video stream.
pub struct ObjectTracker {
    tracker: BYTETracker,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackError> {
        Ok(Self {
            tracker: BYTETracker::new(config)?,
        })
    }

    /// Feed one frame of detections; boxes, scores and classes pass through unchanged.
    ///
    /// A frame without detections still advances the tracker so that missed
    /// frames count toward track expiry.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<STrack> {
        let tracks = self.tracker.update(detections.to_vec());
        if detections.is_empty() {
            return Vec::new();
        }
        tracks
    }

    pub fn tracker(&self) -> &BYTETracker {
        &self.tracker
    }
}

/// Plain records for the confirmed tracks among `tracks`.
pub fn track_info(tracks: &[STrack]) -> Vec<TrackRecord> {
    tracks
        .iter()
        .filter(|t| t.is_confirmed())
        .map(|t| TrackRecord {
            id: t.track_id,
            class: if t.class_name.is_empty() {
                UNKNOWN_CLASS.to_string()
            } else {
                t.class_name.clone()
            },
            bbox: t.rect().to_ltrb_pixels(),
        })
        .collect()
}
