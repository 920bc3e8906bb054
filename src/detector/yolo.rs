use std::path::Path;
use std::time::Instant;

use image::DynamicImage;
use ndarray::{ArrayView2, ArrayViewD, Axis, Ix3};
use tract_onnx::prelude::*;

use super::postprocess::{decode, non_max_suppression, Thresholds};
use super::preprocess::letterbox;
use super::{ClassNames, DetectError, Detector};
use crate::models::ImageDetections;

pub const DEFAULT_INPUT_SIZE: u32 = 640;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

#[derive(Debug, Clone, Default)]
pub struct YoloOptions {
    /// Square input side. Taken from the model metadata when unset.
    pub input_size: Option<u32>,
    pub thresholds: Thresholds,
    /// Overrides the class names embedded in the model.
    pub class_names: Option<Vec<String>>,
}

/// YOLOv8-style detector exported to ONNX and run with tract.
pub struct YoloDetector {
    model: Plan,
    input_size: u32,
    thresholds: Thresholds,
    names: ClassNames,
}

impl YoloDetector {
    pub fn load(path: impl AsRef<Path>, options: &YoloOptions) -> TractResult<Self> {
        let path = path.as_ref();
        let onnx = tract_onnx::onnx();

        let proto = onnx.proto_model_for_path(path)?;
        let metadata = ModelMetadata::from_props(
            proto
                .metadata_props
                .iter()
                .map(|prop| (prop.key.as_str(), prop.value.as_str())),
        );

        let input_size = options
            .input_size
            .or(metadata.imgsz)
            .unwrap_or(DEFAULT_INPUT_SIZE);
        let side = input_size as usize;

        let model = onnx
            .model_for_proto_model(&proto)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )?
            .into_optimized()?
            .into_runnable()?;

        let names = match (&options.class_names, metadata.names) {
            (Some(names), _) => ClassNames::from_list(names.iter().cloned()),
            (None, Some(names)) => names,
            (None, None) => {
                let classes = model
                    .model()
                    .output_fact(0)?
                    .shape
                    .as_concrete()
                    .and_then(|shape| shape.get(1).copied())
                    .map_or(0, |rows| rows.saturating_sub(4));
                tracing::warn!(classes, "no class names in model metadata");
                ClassNames::generic(classes)
            }
        };

        tracing::info!(
            path = %path.display(),
            input_size,
            classes = names.len(),
            "Model loaded"
        );

        Ok(Self {
            model,
            input_size,
            thresholds: options.thresholds,
            names,
        })
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<ImageDetections>, DetectError> {
        let started = Instant::now();
        let (input, geometry) = letterbox(image, self.input_size);

        let outputs = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .map_err(|e| DetectError::Inference(format!("{e:#}")))?;
        let output = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| DetectError::Inference(format!("{e:#}")))?;

        let matrix = prediction_matrix(output, self.names.len())?;
        let candidates = decode(matrix, &self.thresholds)?;
        let detections = non_max_suppression(candidates, &self.thresholds)
            .into_iter()
            .map(|mut detection| {
                detection.bbox = geometry.restore(detection.bbox);
                detection
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            detections = detections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Inference complete"
        );

        Ok(vec![ImageDetections { detections }])
    }

    fn class_names(&self) -> &ClassNames {
        &self.names
    }
}

/// Drops the batch axis of a `[1, 4 + classes, candidates]` output. Exports
/// that put candidates first are transposed back.
fn prediction_matrix(
    output: ArrayViewD<'_, f32>,
    classes: usize,
) -> Result<ArrayView2<'_, f32>, DetectError> {
    let shape = output.shape().to_vec();
    let Ok(output) = output.into_dimensionality::<Ix3>() else {
        return Err(DetectError::UnexpectedOutput(format!(
            "expected a rank-3 tensor, got {shape:?}"
        )));
    };
    if shape[0] != 1 {
        return Err(DetectError::UnexpectedOutput(format!(
            "expected a batch of one, got {shape:?}"
        )));
    }

    let matrix = output.index_axis_move(Axis(0), 0);
    if matrix.nrows() != 4 + classes && matrix.ncols() == 4 + classes {
        Ok(matrix.reversed_axes())
    } else {
        Ok(matrix)
    }
}

/// The parts of the Ultralytics export metadata the detector uses.
#[derive(Debug, Default, PartialEq)]
struct ModelMetadata {
    names: Option<ClassNames>,
    imgsz: Option<u32>,
}

impl ModelMetadata {
    fn from_props<'a>(props: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut metadata = Self::default();
        for (key, value) in props {
            match key {
                "names" => metadata.names = ClassNames::from_metadata(value),
                // "[640, 640]"
                "imgsz" => {
                    metadata.imgsz = value
                        .trim_matches(|c| c == '[' || c == ']')
                        .split(',')
                        .next()
                        .and_then(|side| side.trim().parse().ok())
                }
                _ => {}
            }
        }
        metadata
    }
}
