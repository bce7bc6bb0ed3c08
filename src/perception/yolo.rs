use super::labels::label_for;
use super::preprocess::Preprocessor;
use super::types::{BoundingBox, Detection, DetectionModel};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ndarray::{s, ArrayViewD, Axis, Ix3};
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// Detector tuning knobs
#[derive(Debug, Clone, PartialEq)]
pub struct YoloParams {
    /// Square model input edge, 640 typical
    pub input_size: u32,
    /// Detections below this never leave the model
    pub min_confidence: f32,
    /// Overlap above which the weaker same-class box is suppressed
    pub nms_iou: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            min_confidence: 0.25,
            nms_iou: 0.45,
            max_detections: 100,
        }
    }
}

fn ort_err<E: std::fmt::Display>(err: E) -> anyhow::Error {
    anyhow!("onnx runtime: {}", err)
}

/// YOLOv8-family object detector (single output `[1, 4 + classes, anchors]`)
pub struct YoloDetector {
    session: Session,
    preprocessor: Preprocessor,
    params: YoloParams,
}

impl YoloDetector {
    /// Load a detector from an ONNX file
    ///
    /// TensorRT and CUDA are registered when available, otherwise ONNX Runtime
    /// falls back to the CPU provider.
    pub fn new<P: AsRef<Path>>(model_path: P, params: YoloParams) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading detection model from {}", path.display());

        let session = Session::builder()
            .map_err(ort_err)?
            .with_execution_providers([
                TensorRTExecutionProvider::default().build(),
                CUDAExecutionProvider::default().build(),
            ])
            .map_err(ort_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_err)?
            .with_intra_threads(4)
            .map_err(ort_err)?
            .commit_from_file(path)
            .map_err(ort_err)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!(
            input_size = params.input_size,
            min_confidence = params.min_confidence,
            "Detection model loaded"
        );

        let preprocessor = Preprocessor::new(params.input_size, params.input_size);

        Ok(Self {
            session,
            preprocessor,
            params,
        })
    }
}

impl DetectionModel for YoloDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let _span = tracing::debug_span!("yolo_detect").entered();

        let input = self.preprocessor.preprocess(frame);
        let (frame_width, frame_height) = frame.dimensions();
        let scale = self.preprocessor.scale_to_frame(frame_width, frame_height);

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view()).map_err(ort_err)?])
            .map_err(ort_err)
            .context("Failed to run inference")?;
        drop(_infer_span);

        let predictions = outputs[0].try_extract_array::<f32>().map_err(ort_err)?;
        decode_predictions(predictions, &self.params, scale)
    }

    fn input_size(&self) -> (u32, u32) {
        (self.params.input_size, self.params.input_size)
    }
}

/// Turn a raw YOLOv8 output tensor into frame-space detections
///
/// Accepts both `[1, 4 + classes, anchors]` and the transposed
/// `[1, anchors, 4 + classes]` layout. Boxes are `cx, cy, w, h` in model input
/// pixels and get multiplied by `scale` (x, y).
pub fn decode_predictions(
    output: ArrayViewD<'_, f32>,
    params: &YoloParams,
    scale: (f32, f32),
) -> Result<Vec<Detection>> {
    let output = output
        .into_dimensionality::<Ix3>()
        .context("Unexpected detector output rank")?;
    let output = if output.shape()[1] > output.shape()[2] {
        output.permuted_axes([0, 2, 1])
    } else {
        output
    };
    let predictions = output.index_axis(Axis(0), 0);
    let channels = predictions.shape()[0];
    if channels <= 4 {
        return Err(anyhow!(
            "detector output has {} channels, expected box + class scores",
            channels
        ));
    }

    let (scale_x, scale_y) = scale;
    let mut candidates = Vec::new();

    for anchor in 0..predictions.shape()[1] {
        let scores = predictions.slice(s![4.., anchor]);
        let Some((class_id, &score)) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            continue;
        };
        if score < params.min_confidence {
            continue;
        }

        let cx = predictions[[0, anchor]];
        let cy = predictions[[1, anchor]];
        let w = predictions[[2, anchor]];
        let h = predictions[[3, anchor]];

        candidates.push(Detection::new(
            label_for(class_id),
            score.clamp(0.0, 1.0),
            BoundingBox {
                x1: (cx - w / 2.0) * scale_x,
                y1: (cy - h / 2.0) * scale_y,
                x2: (cx + w / 2.0) * scale_x,
                y2: (cy + h / 2.0) * scale_y,
            },
        ));
    }

    Ok(non_max_suppression(
        candidates,
        params.nms_iou,
        params.max_detections,
    ))
}

/// Greedy per-class NMS, highest confidence first
pub fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.label == candidate.label && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
