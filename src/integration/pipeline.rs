//! TrackerPipeline for combining detection with tracking over a video.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::annotate::Annotator;
use crate::integration::{BoxError, DetectionSource};
use crate::integration::object_tracker::{DetectionRecord, ObjectTracker, TrackRecord, track_info};
use crate::tracker::{Detection, STrack, TrackError, TrackerConfig};
use crate::video::{FrameSink, FrameSource, VideoError};

/// Frames with an index below this are always recorded.
const WARMUP_FRAMES: usize = 5;
/// After warm-up, every n-th frame is recorded.
const SAMPLE_EVERY: usize = 10;
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("detection failed: {0}")]
    Detection(#[source] BoxError),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    Tracker(#[from] TrackError),
}

/// Detections and tracker output of one frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub detections: Vec<Detection>,
    pub tracks: Vec<STrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_number: usize,
    pub detections: Vec<DetectionRecord>,
    pub tracks: Vec<TrackRecord>,
}

/// Aggregated per-video result of [`TrackerPipeline::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysis {
    pub status: String,
    pub total_frames: usize,
    pub sampled_frames: usize,
    pub frames: Vec<FrameReport>,
}

/// Whether frame `index` goes into the JSON report.
pub fn is_sampled(index: usize) -> bool {
    index < WARMUP_FRAMES || index % SAMPLE_EVERY == 0
}

/// Runs a detector and a tracker over consecutive frames of one stream.
pub struct TrackerPipeline<D: DetectionSource> {
    detector: D,
    tracker: ObjectTracker,
}

impl<D: DetectionSource> TrackerPipeline<D> {
    pub fn new(detector: D, config: TrackerConfig) -> Result<Self, TrackError> {
        Ok(Self {
            detector,
            tracker: ObjectTracker::new(config)?,
        })
    }

    pub fn with_default_config(detector: D) -> Result<Self, TrackError> {
        Self::new(detector, TrackerConfig::default())
    }

    /// Detect on one frame and advance the tracker with the result.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameResult, PipelineError> {
        let detections = self
            .detector
            .detect(frame)
            .map_err(|e| PipelineError::Detection(e.into()))?;
        let tracks = self.tracker.update(&detections);
        Ok(FrameResult { detections, tracks })
    }

    /// Process the whole stream and keep a sampled per-frame report.
    pub fn analyze<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<VideoAnalysis, PipelineError> {
        let expected = source.info().frame_count;
        tracing::info!(frames = ?expected, "analyzing video");

        let mut frames = Vec::new();
        let mut index = 0usize;
        while let Some(frame) = source.next_frame()? {
            let result = self.process_frame(&frame)?;
            if is_sampled(index) {
                frames.push(FrameReport {
                    frame_number: index,
                    detections: result.detections.iter().map(DetectionRecord::from).collect(),
                    tracks: track_info(&result.tracks),
                });
            }
            index += 1;
            if index % PROGRESS_EVERY == 0 {
                tracing::info!(processed = index, total = ?expected, "progress");
            }
        }

        tracing::info!(frames = index, "analysis finished");
        Ok(VideoAnalysis {
            status: "success".to_string(),
            total_frames: index,
            sampled_frames: frames.len(),
            frames,
        })
    }

    /// Process the whole stream, drawing confirmed tracks onto every frame.
    pub fn annotate<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        annotator: &Annotator,
    ) -> Result<usize, PipelineError>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let mut count = 0usize;
        while let Some(frame) = source.next_frame()? {
            let result = self.process_frame(&frame)?;
            let annotated = annotator.draw_tracks(&frame, &result.tracks);
            sink.write_frame(&annotated)?;
            count += 1;
            if count % PROGRESS_EVERY == 0 {
                tracing::info!(processed = count, "annotation progress");
            }
        }
        sink.finish()?;
        tracing::info!(frames = count, "annotated video written");
        Ok(count)
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }
}
