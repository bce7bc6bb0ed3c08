use super::{CameraDescriptor, CaptureSource};
use crate::error::SourceFault;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::{Camera, NokhwaError};

pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    pub fn open(descriptor: &CameraDescriptor, width: u32, height: u32) -> Result<Self, SourceFault> {
        tracing::info!("Opening camera {} at {}x{}", descriptor, width, height);

        let index = match descriptor {
            CameraDescriptor::Index(i) => CameraIndex::Index(*i),
            CameraDescriptor::Url(url) => CameraIndex::String(url.clone()),
        };
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera = Camera::new(index, requested)
            .map_err(|e| SourceFault::Disconnected(format!("failed to open camera: {}", e)))?;

        camera
            .open_stream()
            .map_err(|e| SourceFault::Disconnected(format!("failed to open camera stream: {}", e)))?;

        let resolution = camera.resolution();
        tracing::info!(
            "Camera opened at {}x{}",
            resolution.width(),
            resolution.height()
        );

        Ok(Self {
            camera,
            width: resolution.width(),
            height: resolution.height(),
        })
    }
}

/// Read/decode errors are per-frame, everything else means the device is gone
fn classify(err: NokhwaError) -> SourceFault {
    match err {
        NokhwaError::ReadFrameError(_) | NokhwaError::ProcessFrameError { .. } => {
            tracing::debug!("Frame read failed: {}", err);
            SourceFault::FrameUnavailable
        }
        other => SourceFault::Disconnected(other.to_string()),
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage, SourceFault> {
        let frame = self.camera.frame().map_err(classify)?;
        let decoded = frame.decode_image::<RgbFormat>().map_err(classify)?;
        Ok(decoded)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {}", e);
        }
    }
}
