use anyhow::Result;
use image::RgbImage;
use std::time::Instant;

/// Axis-aligned box in frame pixel coordinates (top-left, bottom-right)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union, 0.0 for disjoint or degenerate boxes
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One classified object instance in a frame
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    /// 0.0 - 1.0
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Detections for a single sampled instant
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub sequence: u64,
    pub timestamp: Instant,
    pub detections: Vec<Detection>,
}

impl FrameResult {
    pub fn new(sequence: u64, detections: Vec<Detection>) -> Self {
        Self {
            sequence,
            timestamp: Instant::now(),
            detections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Trait for object detection models
/// Allows swapping between different backends (YOLOv8, YOLO11, ...)
pub trait DetectionModel {
    /// Run detection on a frame
    ///
    /// Returns detections in frame pixel coordinates, ordered by descending confidence
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}
