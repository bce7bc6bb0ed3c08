//! Wildlife deterrent controller: turns object detections from a live camera
//! into bounded, fail-safe activations of strobe, alarm and fence outputs.

pub mod actuator;
pub mod capture;
pub mod config;
pub mod control;
pub mod error;
pub mod perception;
pub mod policy;
pub mod source;

pub use actuator::{ActivationHandle, ActuatorBank, DigitalOutput};
pub use control::{ControlLoop, LoopSettings, LoopState, RunOutcome, StopSignal};
pub use error::{ConfigError, HardwareFault, SourceFault};
pub use perception::{BoundingBox, Detection, FrameResult};
pub use policy::{ActivationWindow, Decision, OverlapMode, TriggerPolicy};
pub use source::{DetectionSource, FrameProvider};
