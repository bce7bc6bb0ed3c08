use crate::error::{HardwareFault, SourceFault};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Starting,
    Running,
    Degraded(DegradedReason),
    ShuttingDown(ShutdownReason),
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DegradedReason {
    /// Source dropped out or stopped answering
    SourceLost(SourceFault),
    /// Too many transient faults in a row
    PersistentFaults { count: u32, last: SourceFault },
}

impl DegradedReason {
    pub fn fault(&self) -> &SourceFault {
        match self {
            DegradedReason::SourceLost(fault) => fault,
            DegradedReason::PersistentFaults { last, .. } => last,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    StopRequested,
    Fatal(FatalReason),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FatalReason {
    #[error("source could not be opened: {0}")]
    StartupFailed(SourceFault),

    #[error("{0}")]
    Hardware(HardwareFault),

    #[error("source not re-acquired after {attempts} attempts, last fault: {last}")]
    ReacquisitionExhausted { attempts: u32, last: SourceFault },
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::SourceLost(fault) => write!(f, "{}", fault),
            DegradedReason::PersistentFaults { count, last } => {
                write!(f, "{} consecutive faults, last: {}", count, last)
            }
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::StopRequested => f.write_str("stop requested"),
            ShutdownReason::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Starting => f.write_str("starting"),
            LoopState::Running => f.write_str("running"),
            LoopState::Degraded(reason) => write!(f, "degraded ({})", reason),
            LoopState::ShuttingDown(reason) => write!(f, "shutting down ({})", reason),
            LoopState::Stopped => f.write_str("stopped"),
        }
    }
}
