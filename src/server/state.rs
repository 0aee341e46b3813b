use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbImage;

use crate::annotate::Annotator;
use crate::faq::FaqMatcher;
use crate::integration::{BoxError, DetectionSource, DynDetector};
use crate::tracker::{Detection, TrackerConfig};
use crate::translate::Translator;
use crate::video::{FrameSink, FrameSource, VideoError, VideoInfo};

const DEFAULT_UPLOAD_LIMIT: usize = 512 * 1024 * 1024;

/// Opens uploaded videos and creates annotated outputs.
///
/// Sources and sinks live on the blocking worker that opened them.
pub trait VideoIo: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, VideoError>;

    fn create(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>, VideoError>;
}

/// [`VideoIo`] backed by the FFmpeg libraries.
#[cfg(feature = "ffmpeg")]
#[derive(Debug, Clone, Default)]
pub struct FfmpegIo(pub crate::video::VideoConfig);

#[cfg(feature = "ffmpeg")]
impl VideoIo for FfmpegIo {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, VideoError> {
        Ok(Box::new(crate::video::FfmpegReader::open(path)?))
    }

    fn create(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>, VideoError> {
        Ok(Box::new(crate::video::FfmpegWriter::create(
            &self.0,
            path,
            info.width,
            info.height,
            info.fps,
        )?))
    }
}

/// One detector shared by all requests; each frame takes the lock once.
#[derive(Clone)]
pub struct SharedDetector(Arc<Mutex<DynDetector>>);

impl SharedDetector {
    pub fn new(detector: DynDetector) -> Self {
        Self(Arc::new(Mutex::new(detector)))
    }
}

impl DetectionSource for SharedDetector {
    type Error = BoxError;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, BoxError> {
        // A panic inside `detect` fails only the request that caused it.
        let mut detector = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        detector.detect(frame)
    }
}

/// Everything the handlers share. Trackers are not shared: every video
/// request builds its own from `tracker`.
///
/// Video routes answer 503 until both a detector and a video backend are set.
#[derive(Clone)]
pub struct AppState {
    pub detector: Option<SharedDetector>,
    pub tracker: TrackerConfig,
    pub video: Option<Arc<dyn VideoIo>>,
    pub annotator: Arc<Annotator>,
    pub faq: Option<Arc<FaqMatcher>>,
    pub translator: Option<Arc<Translator>>,
    pub upload_limit: usize,
}

impl AppState {
    pub fn new(tracker: TrackerConfig) -> Self {
        Self {
            detector: None,
            tracker,
            video: None,
            annotator: Arc::new(Annotator::default()),
            faq: None,
            translator: None,
            upload_limit: DEFAULT_UPLOAD_LIMIT,
        }
    }

    pub fn with_detector(mut self, detector: DynDetector) -> Self {
        self.detector = Some(SharedDetector::new(detector));
        self
    }

    pub fn with_video(mut self, video: impl VideoIo + 'static) -> Self {
        self.video = Some(Arc::new(video));
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Arc::new(annotator);
        self
    }

    pub fn with_faq(mut self, faq: FaqMatcher) -> Self {
        self.faq = Some(Arc::new(faq));
        self
    }

    pub fn with_translator(mut self, translator: Translator) -> Self {
        self.translator = Some(Arc::new(translator));
        self
    }

    pub fn with_upload_limit(mut self, bytes: usize) -> Self {
        self.upload_limit = bytes;
        self
    }

    pub fn models_loaded(&self) -> bool {
        self.detector.is_some()
    }
}
