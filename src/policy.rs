//! Trigger decisions: does this frame start, extend or leave alone an activation

use crate::perception::{Detection, FrameResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Interval during which the actuators are held energized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationWindow {
    start: Instant,
    duration: Duration,
}

impl ActivationWindow {
    pub fn new(start: Instant, duration: Duration) -> Self {
        Self { start, duration }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn expires_at(&self) -> Instant {
        self.start + self.duration
    }

    pub fn has_elapsed(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

/// What to do with a qualifying frame while a window is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapMode {
    /// Fixed-length burst; detections during the window are ignored
    #[default]
    Ignore,
    /// Keep the deterrents on while the target lingers
    Extend,
}

impl FromStr for OverlapMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(OverlapMode::Ignore),
            "extend" => Ok(OverlapMode::Extend),
            other => Err(format!(
                "unknown overlap mode `{}` (expected `ignore` or `extend`)",
                other
            )),
        }
    }
}

impl fmt::Display for OverlapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapMode::Ignore => f.write_str("ignore"),
            OverlapMode::Extend => f.write_str("extend"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoAction,
    StartActivation,
    ExtendActivation,
    /// Qualifying frame inside an open window, nothing to do
    AlreadyActive,
}

/// Fixed at startup: which labels matter and how sure the model must be
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    targets: HashSet<String>,
    threshold: f32,
    overlap: OverlapMode,
}

impl TriggerPolicy {
    pub fn new<I, S>(targets: I, threshold: f32, overlap: OverlapMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            threshold,
            overlap,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn overlap(&self) -> OverlapMode {
        self.overlap
    }

    pub fn targets(&self) -> &HashSet<String> {
        &self.targets
    }

    /// Target label with confidence strictly above the threshold
    pub fn qualifies(&self, detection: &Detection) -> bool {
        detection.confidence > self.threshold && self.targets.contains(&detection.label)
    }

    /// The first detection in the frame that qualifies
    pub fn first_match<'a>(&self, frame: &'a FrameResult) -> Option<&'a Detection> {
        frame.detections.iter().find(|d| self.qualifies(d))
    }

    pub fn evaluate(
        &self,
        frame: &FrameResult,
        current_window: Option<ActivationWindow>,
        now: Instant,
    ) -> Decision {
        if self.first_match(frame).is_none() {
            return Decision::NoAction;
        }

        match current_window.filter(|w| !w.has_elapsed(now)) {
            None => Decision::StartActivation,
            Some(_) => match self.overlap {
                OverlapMode::Ignore => Decision::AlreadyActive,
                OverlapMode::Extend => Decision::ExtendActivation,
            },
        }
    }
}
