use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::detector::{yolo::YoloOptions, Thresholds};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within 0..=1, got {value}")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("target label must not be empty")]
    EmptyTarget,
}

/// Reports whether an uploaded road photo shows a pothole.
#[derive(Debug, Clone, Parser)]
#[command(name = "pothole-detector", version, about)]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "POTHOLE_BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// ONNX export of the detection model
    #[arg(long, env = "MODEL_PATH", default_value = "best.onnx")]
    pub model: PathBuf,

    /// Square model input side; read from the model metadata when omitted
    #[arg(long, env = "INPUT_SIZE")]
    pub input_size: Option<u32>,

    #[arg(long, env = "CONFIDENCE_THRESHOLD", default_value_t = 0.25)]
    pub conf: f32,

    #[arg(long, env = "IOU_THRESHOLD", default_value_t = 0.7)]
    pub iou: f32,

    #[arg(long, env = "MAX_DETECTIONS", default_value_t = 300)]
    pub max_det: usize,

    /// Label that counts as a pothole, compared case-insensitively
    #[arg(long, env = "TARGET_LABEL", default_value = "pothole")]
    pub target_label: String,

    /// Comma separated class names, overriding the model metadata
    #[arg(long, env = "CLASS_NAMES", value_delimiter = ',')]
    pub class_names: Option<Vec<String>>,

    /// HTTP worker threads; defaults to the number of physical cores
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("conf", self.conf), ("iou", self.iou)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }
        if self.max_det == 0 {
            return Err(ConfigError::Zero("max-det"));
        }
        if self.input_size == Some(0) {
            return Err(ConfigError::Zero("input-size"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Zero("workers"));
        }
        if self.target_label.trim().is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        Ok(())
    }

    pub fn yolo_options(&self) -> YoloOptions {
        YoloOptions {
            input_size: self.input_size,
            thresholds: Thresholds {
                confidence: self.conf,
                iou: self.iou,
                max_detections: self.max_det,
            },
            class_names: self.class_names.clone(),
        }
    }
}
