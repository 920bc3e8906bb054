use ndarray::{s, ArrayView2};

use super::DetectError;
use crate::models::{BoundingBox, Detection};

/// Upper bound on boxes fed into NMS.
const MAX_NMS_CANDIDATES: usize = 30_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
    pub max_detections: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou: 0.7,
            max_detections: 300,
        }
    }
}

/// Turns a `[4 + classes, candidates]` prediction matrix into scored boxes
/// in model-input pixels. Only the best class of each candidate is kept.
pub fn decode(
    output: ArrayView2<f32>,
    thresholds: &Thresholds,
) -> Result<Vec<Detection>, DetectError> {
    let (rows, candidates) = output.dim();
    if rows < 5 {
        return Err(DetectError::UnexpectedOutput(format!(
            "expected at least 5 rows (4 box + classes), got {rows}"
        )));
    }

    let mut detections = Vec::new();
    for i in 0..candidates {
        let scores = output.slice(s![4.., i]);
        let best = scores.indexed_iter().max_by(|a, b| a.1.total_cmp(b.1));

        let Some((class_id, &confidence)) = best else {
            continue;
        };
        if !(confidence > thresholds.confidence) {
            continue;
        }

        detections.push(Detection {
            class_id,
            confidence,
            bbox: BoundingBox::from_center(
                output[[0, i]],
                output[[1, i]],
                output[[2, i]],
                output[[3, i]],
            ),
        });
    }

    Ok(detections)
}

/// Greedy per-class NMS, highest confidence first.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    thresholds: &Thresholds,
) -> Vec<Detection> {
    detections.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections.truncate(MAX_NMS_CANDIDATES);

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in detections {
        if kept.len() >= thresholds.max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > thresholds.iou
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
