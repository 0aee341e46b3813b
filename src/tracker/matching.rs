//! Cost matrices and assignment for associating tracks with detections.

use ndarray::Array2;
use serde::Serialize;

use crate::tracker::rect::{Rect, iou_batch};

/// One detector output for one frame, as consumed by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: Rect,
    pub score: f32,
    pub class_id: usize,
    pub class_name: String,
}

impl Detection {
    /// Build from corner coordinates.
    pub fn new(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        score: f32,
        class_id: usize,
        class_name: impl Into<String>,
    ) -> Self {
        Self::from_rect(Rect::from_ltrb(x1, y1, x2, y2), score, class_id, class_name)
    }

    pub fn from_rect(bbox: Rect, score: f32, class_id: usize, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            score,
            class_id,
            class_name: class_name.into(),
        }
    }
}

/// `1 - IoU` for every track/detection pair.
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
    iou_batch(track_boxes, det_boxes).mapv(|iou| 1.0 - iou)
}

/// Weight IoU similarity by detection confidence so that strong detections win ties.
pub fn fuse_score(cost_matrix: &mut Array2<f32>, scores: &[f32]) {
    for ((_, j), cost) in cost_matrix.indexed_iter_mut() {
        let fused_sim = (1.0 - *cost) * scores[j];
        *cost = 1.0 - fused_sim;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Optimal assignment via LAPJV; pairs costing more than `thresh` are rejected.
///
/// The cost matrix is padded to a square with a prohibitive cost so that
/// rectangular problems are solvable.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        };
    }

    let size = num_rows.max(num_cols);
    let padded = Array2::<f64>::from_shape_fn((size, size), |(i, j)| {
        if i < num_rows && j < num_cols {
            cost_matrix[[i, j]] as f64
        } else {
            1e6
        }
    });

    let mut result = AssignmentResult::default();
    let mut det_unmatched = vec![true; num_cols];

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
                if col < num_cols && cost_matrix[[row, col]] <= thresh {
                    result.matches.push((row, col));
                    det_unmatched[col] = false;
                } else {
                    result.unmatched_tracks.push(row);
                }
            }
        }
        Err(err) => {
            tracing::warn!(?err, "linear assignment failed, treating all pairs as unmatched");
            result.unmatched_tracks = (0..num_rows).collect();
        }
    }

    result.unmatched_detections = det_unmatched
        .iter()
        .enumerate()
        .filter_map(|(i, &free)| free.then_some(i))
        .collect();

    result
}
