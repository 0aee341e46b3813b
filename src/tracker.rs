//! ByteTrack engine: Kalman motion model, IoU association and track lifecycle.

mod byte_tracker;
mod kalman_filter;
mod matching;
mod rect;
mod strack;
mod track_state;

pub use byte_tracker::{BYTETracker, TrackerConfig};
pub use kalman_filter::{KalmanFilter, KalmanState};
pub use matching::{AssignmentResult, Detection, fuse_score, iou_distance, linear_assignment};
pub use rect::{Rect, iou_batch};
pub use strack::STrack;
pub use track_state::TrackState;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrackError {
    #[error("tracker setting `{name}` must lie in [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("low_thresh {low} exceeds track_thresh {high}")]
    InvertedThresholds { low: f32, high: f32 },
    #[error("frame rate must be positive, got {0}")]
    InvalidFrameRate(f32),
    #[error("n_init must be at least 1")]
    ZeroInit,
}
