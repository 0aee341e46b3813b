//! Post-processing for YOLOv8-style heads.
//!
//! The head emits a `[4 + C, N]` matrix per image: one column per anchor with
//! the box as (cx, cy, w, h) in model-input pixels followed by `C` class scores.

use ndarray::ArrayView2;

use crate::integration::builder::DetectionBuilder;
use crate::tracker::Detection;

/// Pick the best class per anchor, drop weak anchors, and map boxes to frame pixels.
pub fn decode_predictions(
    output: ArrayView2<'_, f32>,
    conf_threshold: f32,
    scale: (f32, f32),
) -> Vec<Detection> {
    let (rows, anchors) = output.dim();
    if rows <= 4 {
        return Vec::new();
    }

    let mut detections = Vec::new();
    for i in 0..anchors {
        let column = output.column(i);
        let Some((class_id, score)) = column
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        if score < conf_threshold {
            continue;
        }
        let det = DetectionBuilder::new()
            .xywh(column[0], column[1], column[2], column[3])
            .score(score)
            .class_id(class_id)
            .build();
        detections.push(Detection {
            bbox: det.bbox.scale(scale.0, scale.1),
            ..det
        });
    }
    detections
}

/// Greedy per-class non-maximum suppression, highest score first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn head(columns: &[[f32; 6]]) -> Array2<f32> {
        Array2::from_shape_fn((6, columns.len()), |(r, c)| columns[c][r])
    }

    #[test]
    fn test_decode_picks_best_class_and_scales() {
        let output = head(&[
            [100.0, 100.0, 20.0, 40.0, 0.1, 0.8],
            [50.0, 50.0, 10.0, 10.0, 0.2, 0.3],
        ]);
        let dets = decode_predictions(output.view(), 0.5, (2.0, 0.5));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert_eq!(dets[0].class_name, "bicycle");
        assert_eq!(dets[0].bbox.to_ltrb(), [180.0, 40.0, 220.0, 60.0]);
    }

    #[test]
    fn test_nms_is_per_class() {
        let a = Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, 0, "person");
        let b = Detection::new(1.0, 1.0, 10.0, 10.0, 0.8, 0, "person");
        let c = Detection::new(1.0, 1.0, 10.0, 10.0, 0.7, 2, "car");
        let kept = non_max_suppression(vec![b, c, a], 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].class_id, 2);
    }

    #[test]
    fn test_decode_without_class_rows() {
        let output = Array2::<f32>::zeros((4, 3));
        assert!(decode_predictions(output.view(), 0.1, (1.0, 1.0)).is_empty());
    }
}
