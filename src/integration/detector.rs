//! Trait for object detection inference backends.

use image::RgbImage;

use crate::tracker::Detection;

/// Confidence used when nothing else is configured.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Lowest score a YOLO decoder keeps before NMS.
pub const RAW_CONFIDENCE_FLOOR: f32 = 0.25;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased detector, as held by long-lived services.
pub type DynDetector = Box<dyn DetectionSource<Error = BoxError> + Send>;

/// Anything that turns a frame into detections.
///
/// # Example
///
/// ```ignore
/// use vidtrack::{DetectionSource, Detection};
/// use image::RgbImage;
///
/// struct MyDetector;
///
/// impl DetectionSource for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
///         Ok(vec![])
///     }
/// }
/// ```
pub trait DetectionSource {
    type Error: Into<BoxError>;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error>;
}

impl<D: DetectionSource + ?Sized> DetectionSource for Box<D> {
    type Error = D::Error;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
        (**self).detect(frame)
    }
}

/// Erase the error type of `detector` so it fits in a [`DynDetector`].
pub fn boxed<D>(detector: D) -> DynDetector
where
    D: DetectionSource + Send + 'static,
{
    Box::new(Erased(detector))
}

struct Erased<D>(D);

impl<D: DetectionSource> DetectionSource for Erased<D> {
    type Error = BoxError;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, BoxError> {
        self.0.detect(frame).map_err(Into::into)
    }
}

/// Drops detections below a confidence threshold, leaving the rest untouched.
#[derive(Debug, Clone)]
pub struct ConfidenceFilter<D> {
    inner: D,
    threshold: f32,
}

impl<D: DetectionSource> ConfidenceFilter<D> {
    pub fn new(inner: D) -> Self {
        Self::with_threshold(inner, DEFAULT_CONFIDENCE)
    }

    pub fn with_threshold(inner: D, threshold: f32) -> Self {
        Self { inner, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: DetectionSource> DetectionSource for ConfidenceFilter<D> {
    type Error = D::Error;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
        let mut detections = self.inner.detect(frame)?;
        detections.retain(|d| d.score >= self.threshold);
        Ok(detections)
    }
}
