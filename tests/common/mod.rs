#![allow(dead_code)]

use fieldguard::actuator::{ActuatorBank, DigitalOutput};
use fieldguard::control::{Backoff, LoopSettings, StopSignal};
use fieldguard::error::{HardwareFault, SourceFault};
use fieldguard::perception::{BoundingBox, Detection, FrameResult};
use fieldguard::source::DetectionSource;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const CHANNELS: [&str; 3] = ["strobe", "alarm", "fence"];

/// Everything the source and the outputs saw, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open,
    Pull(usize),
    Reopen(usize),
    Close,
    Write { channel: String, active: bool },
    WriteFailed { channel: String, active: bool },
}

#[derive(Clone, Default)]
pub struct Timeline {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Timeline {
    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Successful writes on one channel, in order
    pub fn levels(&self, channel: &str) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write { channel: c, active } if c == channel => Some(active),
                _ => None,
            })
            .collect()
    }

    pub fn failed_writes(&self, channel: &str, level: bool) -> usize {
        self.events()
            .iter()
            .filter(|e| {
                matches!(e, Event::WriteFailed { channel: c, active } if c == channel && *active == level)
            })
            .count()
    }

    pub fn engages(&self) -> usize {
        self.levels("strobe").iter().filter(|a| **a).count()
    }
}

pub struct RecordingOutput {
    name: String,
    timeline: Timeline,
    fail_on: Option<bool>,
    /// Fail every release once the line has gone active
    stuck_once_engaged: bool,
    engaged: bool,
}

impl RecordingOutput {
    pub fn new(name: &str, timeline: &Timeline) -> Self {
        Self {
            name: name.to_string(),
            timeline: timeline.clone(),
            fail_on: None,
            stuck_once_engaged: false,
            engaged: false,
        }
    }

    pub fn failing_on(mut self, level: bool) -> Self {
        self.fail_on = Some(level);
        self
    }

    pub fn stuck_once_engaged(mut self) -> Self {
        self.stuck_once_engaged = true;
        self
    }
}

impl DigitalOutput for RecordingOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&mut self, active: bool) -> Result<(), HardwareFault> {
        let stuck = self.stuck_once_engaged && self.engaged && !active;
        if self.fail_on == Some(active) || stuck {
            self.timeline.push(Event::WriteFailed {
                channel: self.name.clone(),
                active,
            });
            return Err(HardwareFault::new(&self.name, "line stuck"));
        }
        self.engaged |= active;
        self.timeline.push(Event::Write {
            channel: self.name.clone(),
            active,
        });
        Ok(())
    }
}

/// Bank over the three stock channels; `failing` makes one channel reject a level
pub fn bank(timeline: &Timeline, failing: Option<(&str, bool)>) -> ActuatorBank {
    bank_with(
        CHANNELS
            .iter()
            .map(|name| {
                let output = RecordingOutput::new(name, timeline);
                match failing {
                    Some((n, level)) if n == *name => output.failing_on(level),
                    _ => output,
                }
            })
            .collect(),
    )
}

pub fn bank_with(outputs: Vec<RecordingOutput>) -> ActuatorBank {
    ActuatorBank::new(
        outputs
            .into_iter()
            .map(|output| Box::new(output) as Box<dyn DigitalOutput>)
            .collect(),
    )
    .unwrap()
}

pub fn settings(activation: Duration) -> LoopSettings {
    LoopSettings {
        activation_duration: activation,
        frame_backoff: Duration::from_millis(1),
        max_consecutive_failures: 30,
        reacquire: Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
            max_attempts: 5,
        },
        release_attempts: 3,
        release_retry_delay: Duration::from_millis(1),
        frame_interval: None,
        stats_every: 30,
    }
}

pub enum Step {
    Frame(Vec<(&'static str, f32)>),
    Fault(SourceFault),
    /// Sleep, then return an empty frame
    Pause(Duration),
    /// Sleep, then return these detections
    Late(Duration, Vec<(&'static str, f32)>),
}

pub fn target(label: &'static str, confidence: f32) -> Step {
    Step::Frame(vec![(label, confidence)])
}

pub fn empty() -> Step {
    Step::Frame(Vec::new())
}

/// Source that plays back a script, then asks the loop to stop
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    reopens: VecDeque<Result<(), SourceFault>>,
    open_result: Result<(), SourceFault>,
    endless: bool,
    stop: StopSignal,
    timeline: Timeline,
    pulls: usize,
    reopen_calls: usize,
    sequence: u64,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>, stop: &StopSignal, timeline: &Timeline) -> Self {
        Self {
            steps: steps.into(),
            reopens: VecDeque::new(),
            open_result: Ok(()),
            endless: false,
            stop: stop.clone(),
            timeline: timeline.clone(),
            pulls: 0,
            reopen_calls: 0,
            sequence: 0,
        }
    }

    /// Results for successive `reopen` calls; once used up, reopen succeeds
    pub fn with_reopens(mut self, results: Vec<Result<(), SourceFault>>) -> Self {
        self.reopens = results.into();
        self
    }

    pub fn failing_open(mut self, fault: SourceFault) -> Self {
        self.open_result = Err(fault);
        self
    }

    /// Keep producing empty frames after the script instead of stopping
    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    pub fn pulls(&self) -> usize {
        self.pulls
    }

    pub fn reopen_calls(&self) -> usize {
        self.reopen_calls
    }

    fn frame(&mut self, detections: &[(&'static str, f32)]) -> FrameResult {
        self.sequence += 1;
        let bbox = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 64.0,
            y2: 64.0,
        };
        FrameResult::new(
            self.sequence,
            detections
                .iter()
                .map(|(label, confidence)| Detection::new(*label, *confidence, bbox))
                .collect(),
        )
    }
}

impl DetectionSource for ScriptedSource {
    fn open(&mut self) -> Result<(), SourceFault> {
        self.timeline.push(Event::Open);
        self.open_result.clone()
    }

    fn next(&mut self) -> Result<FrameResult, SourceFault> {
        self.pulls += 1;
        self.timeline.push(Event::Pull(self.pulls));

        match self.steps.pop_front() {
            Some(Step::Frame(detections)) => Ok(self.frame(&detections)),
            Some(Step::Fault(fault)) => Err(fault),
            Some(Step::Pause(pause)) => {
                thread::sleep(pause);
                Ok(self.frame(&[]))
            }
            Some(Step::Late(delay, detections)) => {
                thread::sleep(delay);
                Ok(self.frame(&detections))
            }
            None if self.endless => {
                thread::sleep(Duration::from_millis(2));
                Ok(self.frame(&[]))
            }
            None => {
                self.stop.request();
                Err(SourceFault::FrameUnavailable)
            }
        }
    }

    fn reopen(&mut self) -> Result<(), SourceFault> {
        self.reopen_calls += 1;
        self.timeline.push(Event::Reopen(self.reopen_calls));
        self.reopens.pop_front().unwrap_or(Ok(()))
    }

    fn close(&mut self) {
        self.timeline.push(Event::Close);
    }
}
