mod pipeline;
mod timed;

pub use pipeline::DetectionPipeline;
pub use timed::{ProviderFactory, TimedSource};

use crate::error::SourceFault;
use crate::perception::FrameResult;

/// Pull-based stream of detections, as seen by the control loop
///
/// Every call must return within a bounded time.
pub trait DetectionSource {
    /// Acquire the video source and perception provider
    fn open(&mut self) -> Result<(), SourceFault>;

    /// One frame's detections, or why there are none
    fn next(&mut self) -> Result<FrameResult, SourceFault>;

    /// Re-acquire after a disconnect or stall
    fn reopen(&mut self) -> Result<(), SourceFault>;

    /// Release the source; safe to call more than once
    fn close(&mut self);
}

/// Produces frames with detections; runs on the adapter's worker thread
///
/// Calls may block for as long as the camera or model takes.
pub trait FrameProvider {
    fn pull(&mut self) -> Result<FrameResult, SourceFault>;

    fn reopen(&mut self) -> Result<(), SourceFault>;
}
