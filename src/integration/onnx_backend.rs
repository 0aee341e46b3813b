//! ONNX Runtime backend for YOLOv8 exports.
//!
//! # Example
//!
//! ```ignore
//! use vidtrack::integration::{YoloDetector, YoloOptions};
//!
//! let mut detector = YoloDetector::load("yolov8n.onnx".as_ref(), YoloOptions::default())?;
//! let detections = detector.detect(&frame)?;
//! ```

use std::path::Path;

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array4, Ix3};
use ort::session::Session;
use ort::value::Tensor;

use super::yolo_decode::{decode_predictions, non_max_suppression};
use super::{DetectionSource, RAW_CONFIDENCE_FLOOR};
use crate::tracker::Detection;

#[derive(Debug, thiserror::Error)]
pub enum YoloError {
    #[error(transparent)]
    Ort(#[from] ort::Error),
    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<usize>),
    #[error("model produced no outputs")]
    NoOutput,
}

#[derive(Debug, Clone, Copy)]
pub struct YoloOptions {
    pub input_size: u32,
    /// Candidate floor before NMS; the service threshold is applied by
    /// [`ConfidenceFilter`](super::ConfidenceFilter).
    pub conf_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for YoloOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: RAW_CONFIDENCE_FLOOR,
            iou_threshold: 0.45,
        }
    }
}

pub struct YoloDetector {
    session: Session,
    options: YoloOptions,
}

impl YoloDetector {
    pub fn load(model: &Path, options: YoloOptions) -> Result<Self, YoloError> {
        let session = Session::builder()?.commit_from_file(model)?;
        tracing::info!(model = %model.display(), input = options.input_size, "YOLO model loaded");
        Ok(Self { session, options })
    }

    /// Stretch to the square model input and lay out as normalised NCHW.
    fn preprocess(&self, frame: &RgbImage) -> Array4<f32> {
        let size = self.options.input_size;
        let resized = imageops::resize(frame, size, size, FilterType::Triangle);
        let side = size as usize;
        let mut input = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        input
    }
}

impl DetectionSource for YoloDetector {
    type Error = YoloError;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, YoloError> {
        let input = Tensor::from_array(self.preprocess(frame))?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() == 0 {
            return Err(YoloError::NoOutput);
        }
        let raw = outputs[0].try_extract_array::<f32>()?;
        let shape = raw.shape().to_vec();
        let head = raw
            .into_dimensionality::<Ix3>()
            .map_err(|_| YoloError::OutputShape(shape.clone()))?;
        if head.dim().0 != 1 {
            return Err(YoloError::OutputShape(shape));
        }

        let size = self.options.input_size as f32;
        let scale = (frame.width() as f32 / size, frame.height() as f32 / size);
        let candidates = decode_predictions(
            head.index_axis(ndarray::Axis(0), 0),
            self.options.conf_threshold,
            scale,
        );
        Ok(non_max_suppression(candidates, self.options.iou_threshold))
    }
}
