use crate::control::{Backoff, LoopSettings};
use crate::error::ConfigError;
use crate::perception::YoloParams;
use crate::policy::{OverlapMode, TriggerPolicy};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Animals we want off the field. Labels the loaded model never emits simply never match.
pub const DEFAULT_TARGETS: [&str; 8] = [
    "dog", "cat", "cow", "elephant", "bear", "wolf", "fox", "deer",
];

/// Longest activation we accept, in seconds
pub const MAX_ACTIVATION_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefenseConfig {
    pub detection: DetectionConfig,
    pub source: SourceConfig,
    pub activation: ActivationConfig,
    pub retry: RetryConfig,
    pub gpio: GpioConfig,
    pub actuators: Vec<ActuatorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub targets: Vec<String>,
    /// A detection must score strictly above this
    pub threshold: f32,
    pub model: PathBuf,
    pub input_size: u32,
    pub min_confidence: f32,
    pub nms_iou: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Device index or stream URL
    pub camera: String,
    pub width: u32,
    pub height: u32,
    /// 0 runs unthrottled
    pub fps: u32,
    pub frame_timeout_ms: u64,
    pub open_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub duration_secs: f64,
    pub overlap: OverlapMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub frame_backoff_ms: u64,
    pub max_consecutive_failures: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
    pub release_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub sysfs_root: PathBuf,
    /// Log output changes instead of touching hardware
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActuatorConfig {
    pub name: String,
    pub pin: u32,
    #[serde(default)]
    pub active_low: bool,
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            source: SourceConfig::default(),
            activation: ActivationConfig::default(),
            retry: RetryConfig::default(),
            gpio: GpioConfig::default(),
            actuators: default_actuators(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let yolo = YoloParams::default();
        Self {
            targets: DEFAULT_TARGETS.iter().map(|s| s.to_string()).collect(),
            threshold: 0.6,
            model: PathBuf::from("yolov8n.onnx"),
            input_size: yolo.input_size,
            min_confidence: yolo.min_confidence,
            nms_iou: yolo.nms_iou,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            camera: "0".to_string(),
            width: 1280,
            height: 720,
            fps: 0,
            frame_timeout_ms: 5000,
            open_timeout_ms: 15000,
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10.0,
            overlap: OverlapMode::Ignore,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            frame_backoff_ms: 1000,
            max_consecutive_failures: 30,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_attempts: 8,
            release_attempts: 3,
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            dry_run: false,
        }
    }
}

fn default_actuators() -> Vec<ActuatorConfig> {
    [("strobe", 18), ("alarm", 23), ("fence", 24)]
        .into_iter()
        .map(|(name, pin)| ActuatorConfig {
            name: name.to_string(),
            pin,
            active_low: false,
        })
        .collect()
}

impl DefenseConfig {
    /// Read a TOML file; missing sections and keys keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let detection = &self.detection;
        if !detection.threshold.is_finite() || !(0.0..1.0).contains(&detection.threshold) {
            return Err(ConfigError::InvalidThreshold(detection.threshold));
        }
        if detection.targets.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::NoTargets);
        }
        if detection.input_size == 0 {
            return Err(ConfigError::InvalidSource("model input size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&detection.min_confidence) {
            return Err(ConfigError::InvalidSource(format!(
                "min_confidence must be within [0, 1], got {}",
                detection.min_confidence
            )));
        }
        if !(detection.nms_iou > 0.0 && detection.nms_iou <= 1.0) {
            return Err(ConfigError::InvalidSource(format!(
                "nms_iou must be within (0, 1], got {}",
                detection.nms_iou
            )));
        }

        let duration = self.activation.duration_secs;
        if !(duration > 0.0 && duration <= MAX_ACTIVATION_SECS) {
            return Err(ConfigError::InvalidDuration(duration));
        }

        if self.source.frame_timeout_ms == 0 || self.source.open_timeout_ms == 0 {
            return Err(ConfigError::InvalidSource("timeouts must be positive".into()));
        }
        if self.source.camera.trim().is_empty() {
            return Err(ConfigError::InvalidSource("camera descriptor is empty".into()));
        }

        let retry = &self.retry;
        if retry.initial_backoff_ms == 0 {
            return Err(ConfigError::InvalidRetry("initial_backoff_ms must be positive".into()));
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            return Err(ConfigError::InvalidRetry(
                "max_backoff_ms must not be below initial_backoff_ms".into(),
            ));
        }
        if retry.max_attempts == 0 || retry.release_attempts == 0 || retry.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidRetry(
                "attempt budgets must be at least 1".into(),
            ));
        }

        if self.actuators.is_empty() {
            return Err(ConfigError::NoActuators);
        }
        let mut names = HashSet::new();
        for actuator in &self.actuators {
            if !names.insert(actuator.name.as_str()) {
                return Err(ConfigError::DuplicateActuator(actuator.name.clone()));
            }
        }

        Ok(())
    }

    pub fn activation_duration(&self) -> Duration {
        Duration::from_secs_f64(self.activation.duration_secs)
    }

    pub fn policy(&self) -> TriggerPolicy {
        let targets = self
            .detection
            .targets
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        TriggerPolicy::new(targets, self.detection.threshold, self.activation.overlap)
    }

    pub fn yolo_params(&self) -> YoloParams {
        YoloParams {
            input_size: self.detection.input_size,
            min_confidence: self.detection.min_confidence,
            nms_iou: self.detection.nms_iou,
            ..YoloParams::default()
        }
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.source.frame_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.source.open_timeout_ms)
    }

    pub fn loop_settings(&self) -> LoopSettings {
        let retry = &self.retry;
        LoopSettings {
            activation_duration: self.activation_duration(),
            frame_backoff: Duration::from_millis(retry.frame_backoff_ms),
            max_consecutive_failures: retry.max_consecutive_failures,
            reacquire: Backoff {
                initial: Duration::from_millis(retry.initial_backoff_ms),
                max: Duration::from_millis(retry.max_backoff_ms),
                max_attempts: retry.max_attempts,
            },
            release_attempts: retry.release_attempts,
            frame_interval: (self.source.fps > 0)
                .then(|| Duration::from_secs_f64(1.0 / self.source.fps as f64)),
            ..LoopSettings::default()
        }
    }
}
