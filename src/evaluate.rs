//! Image-level detector evaluation as a multi-label classification problem.
//!
//! Every image is reduced to the set of class ids present; metrics are
//! computed over one binary column per class with macro averaging, and a
//! class that is never predicted (or never present) scores 0 for the
//! undefined ratio.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::integration::{BoxError, DetectionSource};
use crate::integration::classes::COCO_CLASSES;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("{truth} ground-truth rows but {predicted} predictions")]
    LengthMismatch { truth: usize, predicted: usize },
    #[error("nothing to evaluate")]
    Empty,
    #[error("cannot read manifest {path}: {source}")]
    Manifest {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cannot load image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("detection failed on {path}: {message}")]
    Detection { path: String, message: String },
}

/// One manifest row: an image and the classes it contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSample {
    pub image: PathBuf,
    pub labels: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    /// Share of images whose predicted class set equals the true set.
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

pub fn load_manifest(path: &Path) -> Result<Vec<EvalSample>, EvalError> {
    let bytes = std::fs::read(path).map_err(|source| EvalError::Manifest {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Multi-label metrics over `num_classes` columns; ids outside the range are ignored.
pub fn multilabel_metrics(
    truth: &[Vec<usize>],
    predicted: &[Vec<usize>],
    num_classes: usize,
) -> Result<Metrics, EvalError> {
    if truth.len() != predicted.len() {
        return Err(EvalError::LengthMismatch {
            truth: truth.len(),
            predicted: predicted.len(),
        });
    }
    if truth.is_empty() || num_classes == 0 {
        return Err(EvalError::Empty);
    }

    let as_set = |ids: &[usize]| -> BTreeSet<usize> {
        ids.iter().copied().filter(|&c| c < num_classes).collect()
    };

    let mut tp = vec![0usize; num_classes];
    let mut fp = vec![0usize; num_classes];
    let mut fn_ = vec![0usize; num_classes];
    let mut exact = 0usize;

    for (t, p) in truth.iter().zip(predicted) {
        let (t, p) = (as_set(t), as_set(p));
        if t == p {
            exact += 1;
        }
        for &c in t.intersection(&p) {
            tp[c] += 1;
        }
        for &c in p.difference(&t) {
            fp[c] += 1;
        }
        for &c in t.difference(&p) {
            fn_[c] += 1;
        }
    }

    let n = num_classes as f64;
    let precision = (0..num_classes).map(|c| ratio(tp[c], tp[c] + fp[c])).sum::<f64>() / n;
    let recall = (0..num_classes).map(|c| ratio(tp[c], tp[c] + fn_[c])).sum::<f64>() / n;
    let f1 = (0..num_classes)
        .map(|c| ratio(2 * tp[c], 2 * tp[c] + fp[c] + fn_[c]))
        .sum::<f64>()
        / n;

    Ok(Metrics {
        accuracy: ratio(exact, truth.len()),
        precision,
        recall,
        f1,
    })
}

/// Run `detector` on every manifest image and score the class sets it finds.
pub fn evaluate_detector<D: DetectionSource>(
    detector: &mut D,
    samples: &[EvalSample],
) -> Result<Metrics, EvalError> {
    let mut predicted = Vec::with_capacity(samples.len());
    for (i, sample) in samples.iter().enumerate() {
        let path = sample.image.display().to_string();
        let frame = image::open(&sample.image)
            .map_err(|source| EvalError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        let detections = detector.detect(&frame).map_err(|e| EvalError::Detection {
            path: path.clone(),
            message: Into::<BoxError>::into(e).to_string(),
        })?;
        let classes: Vec<usize> = detections.iter().map(|d| d.class_id).collect();
        tracing::info!(image = %path, index = i + 1, total = samples.len(), ?classes, "evaluated");
        predicted.push(classes);
    }
    let truth: Vec<Vec<usize>> = samples.iter().map(|s| s.labels.clone()).collect();
    multilabel_metrics(&truth, &predicted, COCO_CLASSES.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Detection;
    use image::RgbImage;

    #[test]
    fn test_perfect_predictions() {
        let truth = vec![vec![0, 1], vec![2]];
        let m = multilabel_metrics(&truth, &truth, 3).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.f1, 1.0);
    }

    #[test]
    fn test_macro_average_counts_absent_classes_as_zero() {
        // Class 0 perfect, class 1 never present nor predicted.
        let m = multilabel_metrics(&[vec![0]], &[vec![0]], 2).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 0.5);
        assert_eq!(m.f1, 0.5);
    }

    #[test]
    fn test_partial_predictions() {
        let truth = vec![vec![0, 1], vec![1, 2], vec![0, 2, 3]];
        let pred = vec![vec![0], vec![1, 2], vec![0, 3, 3]];
        let m = multilabel_metrics(&truth, &pred, 4).unwrap();
        assert!((m.accuracy - 1.0 / 3.0).abs() < 1e-12);
        // Every prediction is correct, so precision is perfect on all four classes.
        assert_eq!(m.precision, 1.0);
        // Recall per class: 1, 1/2, 1/2, 1.
        assert!((m.recall - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_mismatched_lengths() {
        assert!(matches!(
            multilabel_metrics(&[vec![0]], &[], 80),
            Err(EvalError::LengthMismatch { truth: 1, predicted: 0 })
        ));
        assert!(matches!(multilabel_metrics(&[], &[], 80), Err(EvalError::Empty)));
    }

    struct AlwaysPerson;

    impl DetectionSource for AlwaysPerson {
        type Error = std::convert::Infallible;

        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
            Ok(vec![Detection::new(0.0, 0.0, 1.0, 1.0, 0.9, 0, "person")])
        }
    }

    #[test]
    fn test_evaluate_detector_on_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        RgbImage::new(8, 8).save(&path).unwrap();

        let samples = vec![
            EvalSample { image: path.clone(), labels: vec![0] },
            EvalSample { image: path, labels: vec![0, 2] },
        ];
        let m = evaluate_detector(&mut AlwaysPerson, &samples).unwrap();
        assert_eq!(m.accuracy, 0.5);

        let missing = vec![EvalSample { image: dir.path().join("nope.png"), labels: vec![] }];
        assert!(matches!(
            evaluate_detector(&mut AlwaysPerson, &missing),
            Err(EvalError::Image { .. })
        ));
    }
}
