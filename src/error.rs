//! Fault taxonomy shared by the source adapter, actuator bank and control loop

use std::path::PathBuf;
use std::time::Duration;

/// Faults reported by the detection source adapter.
///
/// All variants are recoverable from the control loop's point of view:
/// transient ones are retried in place, the rest trigger re-acquisition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceFault {
    /// The camera returned no frame this time
    #[error("frame unavailable")]
    FrameUnavailable,

    /// The source is gone and needs re-acquisition
    #[error("source disconnected: {0}")]
    Disconnected(String),

    /// The perception provider failed on an otherwise valid frame
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// No reply within the per-call timeout
    #[error("source stalled, no reply within {0:?}")]
    Stalled(Duration),
}

impl SourceFault {
    /// Transient faults are retried without leaving the running state
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceFault::FrameUnavailable | SourceFault::InferenceFailure(_)
        )
    }
}

/// A failed write to a digital output line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hardware fault on `{channel}`: {message}")]
pub struct HardwareFault {
    pub channel: String,
    pub message: String,
}

impl HardwareFault {
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

/// Invalid or unreadable configuration. Always fatal before startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("confidence threshold must be within [0, 1), got {0}")]
    InvalidThreshold(f32),

    #[error("activation duration must be within (0, 3600] seconds, got {0}s")]
    InvalidDuration(f64),

    #[error("target set is empty")]
    NoTargets,

    #[error("no actuators configured")]
    NoActuators,

    #[error("duplicate actuator name `{0}`")]
    DuplicateActuator(String),

    #[error("invalid retry settings: {0}")]
    InvalidRetry(String),

    #[error("invalid source settings: {0}")]
    InvalidSource(String),

    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
