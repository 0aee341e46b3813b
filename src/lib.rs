//! Multi-object video tracking service.
//!
//! Frames are decoded from uploaded videos, passed through a detector and a
//! ByteTrack tracker, and returned either as a sampled JSON report or as an
//! annotated video. A small FAQ matcher answers chat questions alongside,
//! and text translation is proxied to Azure Translator.

pub mod annotate;
pub mod config;
pub mod evaluate;
pub mod faq;
pub mod integration;
pub mod server;
pub mod tracker;
pub mod translate;
pub mod video;

pub use annotate::Annotator;
pub use config::AppConfig;
pub use integration::{
    DetectionBuilder, DetectionSource, DynDetector, ObjectTracker, TrackerPipeline, VideoAnalysis,
};
pub use tracker::{BYTETracker, Detection, Rect, STrack, TrackState, TrackerConfig};
