mod labels;
mod preprocess;
pub mod types;
mod yolo;

pub use labels::{label_for, COCO_LABELS};
pub use preprocess::Preprocessor;
pub use types::{BoundingBox, Detection, DetectionModel, FrameResult};
pub use yolo::{decode_predictions, non_max_suppression, YoloDetector, YoloParams};

use anyhow::Result;
use std::path::Path;

/// Create the default detection model (YOLOv8 ONNX)
pub fn create_default_model(
    model_path: impl AsRef<Path>,
    params: YoloParams,
) -> Result<Box<dyn DetectionModel>> {
    let model = YoloDetector::new(model_path, params)?;
    Ok(Box::new(model))
}
