use super::FrameProvider;
use crate::capture::CaptureSource;
use crate::error::SourceFault;
use crate::perception::{DetectionModel, FrameResult};

/// Capture followed by detection, one frame per pull
pub struct DetectionPipeline<C> {
    open_capture: Box<dyn FnMut() -> Result<C, SourceFault>>,
    capture: Option<C>,
    model: Box<dyn DetectionModel>,
    sequence: u64,
}

impl<C: CaptureSource> DetectionPipeline<C> {
    /// Open the capture right away; `open_capture` is reused for re-acquisition
    pub fn new<F>(mut open_capture: F, model: Box<dyn DetectionModel>) -> Result<Self, SourceFault>
    where
        F: FnMut() -> Result<C, SourceFault> + 'static,
    {
        let capture = open_capture()?;
        Ok(Self {
            open_capture: Box::new(open_capture),
            capture: Some(capture),
            model,
            sequence: 0,
        })
    }
}

impl<C: CaptureSource> FrameProvider for DetectionPipeline<C> {
    fn pull(&mut self) -> Result<FrameResult, SourceFault> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| SourceFault::Disconnected("capture is closed".into()))?;

        let frame = match capture.capture_frame() {
            Ok(frame) => frame,
            Err(fault @ SourceFault::Disconnected(_)) => {
                self.capture = None;
                return Err(fault);
            }
            Err(fault) => return Err(fault),
        };

        let detections = self
            .model
            .detect(&frame)
            .map_err(|e| SourceFault::InferenceFailure(format!("{:#}", e)))?;

        self.sequence += 1;
        Ok(FrameResult::new(self.sequence, detections))
    }

    fn reopen(&mut self) -> Result<(), SourceFault> {
        // Old handle goes first so the device is free for the new one
        self.capture = None;
        self.capture = Some((self.open_capture)()?);
        Ok(())
    }
}
