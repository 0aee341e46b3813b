//! Glue between detection backends, the ByteTrack engine and video streams.
//!
//! Backends implement [`DetectionSource`]; [`TrackerPipeline`] drives one
//! backend and one [`ObjectTracker`] over a frame source. The ONNX Runtime
//! backend is only compiled with the `onnx` feature.

pub(crate) mod builder;
pub mod classes;
mod detector;
mod object_tracker;
mod pipeline;
mod yolo_decode;

pub use builder::DetectionBuilder;
pub use classes::{COCO_CLASSES, UNKNOWN_CLASS, class_name};
pub use detector::{
    BoxError, ConfidenceFilter, DEFAULT_CONFIDENCE, DetectionSource, DynDetector,
    RAW_CONFIDENCE_FLOOR, boxed,
};
pub use object_tracker::{DetectionRecord, ObjectTracker, TrackRecord, track_info};
pub use pipeline::{
    FrameReport, FrameResult, PipelineError, TrackerPipeline, VideoAnalysis, is_sampled,
};
pub use yolo_decode::{decode_predictions, non_max_suppression};

#[cfg(feature = "onnx")]
mod onnx_backend;

#[cfg(feature = "onnx")]
pub use onnx_backend::{YoloDetector, YoloError, YoloOptions};
