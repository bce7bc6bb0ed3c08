mod webcam;

pub use webcam::WebcamCapture;

use crate::error::SourceFault;
use image::RgbImage;
use std::fmt;

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<RgbImage, SourceFault>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}

/// Which camera to open: a local device index or a URL handed to the backend as is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraDescriptor {
    Index(u32),
    Url(String),
}

impl CameraDescriptor {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<u32>() {
            Ok(index) => CameraDescriptor::Index(index),
            Err(_) => CameraDescriptor::Url(raw.to_string()),
        }
    }
}

impl fmt::Display for CameraDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraDescriptor::Index(i) => write!(f, "#{}", i),
            CameraDescriptor::Url(url) => f.write_str(url),
        }
    }
}
