pub mod class_names;
pub mod postprocess;
pub mod preprocess;
pub mod yolo;

use image::DynamicImage;
use thiserror::Error;

use crate::models::ImageDetections;

pub use class_names::ClassNames;
pub use postprocess::Thresholds;
pub use yolo::YoloDetector;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),
}

/// An object detector that can be shared across request handlers.
pub trait Detector: Send + Sync {
    /// Runs the model on one image. The result holds one entry per input
    /// image, so it is always a single element here.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<ImageDetections>, DetectError>;

    fn class_names(&self) -> &ClassNames;
}

/// True when any detected region is labeled `target`, ignoring case.
pub fn contains_label(results: &[ImageDetections], names: &ClassNames, target: &str) -> bool {
    let target = target.to_lowercase();
    results
        .iter()
        .flat_map(|result| result.detections.iter())
        .any(|detection| match names.get(detection.class_id) {
            Some(label) => label.to_lowercase() == target,
            None => {
                tracing::warn!(class_id = detection.class_id, "class index has no name");
                false
            }
        })
}
