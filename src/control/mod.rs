//! Detection-to-actuation control loop
//!
//! Pulls detections, asks the trigger policy what to do, drives the actuator
//! bank, and owns the starting/running/degraded/shutdown state machine. Every
//! exit path goes through `shut_down`, which releases the actuators.

mod backoff;
mod state;
mod stop;

pub use backoff::Backoff;
pub use state::{DegradedReason, FatalReason, LoopState, ShutdownReason};
pub use stop::StopSignal;

use crate::actuator::ActuatorBank;
use crate::error::HardwareFault;
use crate::perception::FrameResult;
use crate::policy::{Decision, TriggerPolicy};
use crate::source::DetectionSource;
use std::thread;
use std::time::{Duration, Instant};

/// Timing and retry knobs for the loop
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub activation_duration: Duration,
    /// Pause after a transient source fault
    pub frame_backoff: Duration,
    /// Transient faults in a row before the source counts as lost
    pub max_consecutive_failures: u32,
    pub reacquire: Backoff,
    pub release_attempts: u32,
    pub release_retry_delay: Duration,
    /// Minimum time between frames, `None` to run unthrottled
    pub frame_interval: Option<Duration>,
    /// Log statistics every N frames
    pub stats_every: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            activation_duration: Duration::from_secs(10),
            frame_backoff: Duration::from_secs(1),
            max_consecutive_failures: 30,
            reacquire: Backoff {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(30),
                max_attempts: 8,
            },
            release_attempts: 3,
            release_retry_delay: Duration::from_millis(200),
            frame_interval: None,
            stats_every: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    pub frames: u64,
    pub activations: u64,
    pub transient_faults: u64,
    pub reacquisitions: u64,
    pub total_pull_time: Duration,
}

impl LoopStats {
    pub fn avg_pull_ms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.total_pull_time.as_secs_f64() * 1000.0 / self.frames as f64
        }
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub reason: ShutdownReason,
    /// Result of the final release; an error means outputs may still be live
    pub release: Result<(), HardwareFault>,
    pub stats: LoopStats,
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        self.reason == ShutdownReason::StopRequested && self.release.is_ok()
    }
}

enum Next {
    Running,
    Degraded(DegradedReason),
    ShutDown(ShutdownReason),
}

fn fatal(reason: FatalReason) -> Next {
    Next::ShutDown(ShutdownReason::Fatal(reason))
}

pub struct ControlLoop<S> {
    source: S,
    bank: ActuatorBank,
    policy: TriggerPolicy,
    settings: LoopSettings,
    stop: StopSignal,
    state: LoopState,
    history: Vec<LoopState>,
    stats: LoopStats,
    outcome: Option<RunOutcome>,
}

impl<S: DetectionSource> ControlLoop<S> {
    pub fn new(
        source: S,
        bank: ActuatorBank,
        policy: TriggerPolicy,
        settings: LoopSettings,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            bank,
            policy,
            settings,
            stop,
            state: LoopState::Starting,
            history: vec![LoopState::Starting],
            stats: LoopStats::default(),
            outcome: None,
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Every state entered so far, oldest first
    pub fn history(&self) -> &[LoopState] {
        &self.history
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn bank(&self) -> &ActuatorBank {
        &self.bank
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Drive the state machine until it stops.
    ///
    /// Runs at most once; later calls return the first outcome without
    /// touching the bank or the source.
    pub fn run(&mut self) -> RunOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let reason = match self.start() {
            Next::ShutDown(reason) => reason,
            _ => self.supervise(),
        };
        let outcome = self.shut_down(reason);
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn transition(&mut self, next: LoopState) {
        tracing::info!(from = %self.state, to = %next, "Loop state changed");
        self.state = next.clone();
        self.history.push(next);
    }

    fn start(&mut self) -> Next {
        tracing::info!(channels = ?self.bank.channel_names(), "Forcing actuators inactive");
        if let Err(fault) = self.bank.release_all() {
            return fatal(FatalReason::Hardware(fault));
        }
        if let Err(fault) = self.source.open() {
            tracing::error!("Failed to open detection source: {}", fault);
            return fatal(FatalReason::StartupFailed(fault));
        }
        self.transition(LoopState::Running);
        Next::Running
    }

    fn supervise(&mut self) -> ShutdownReason {
        loop {
            let next = match self.state.clone() {
                LoopState::Running => self.running(),
                LoopState::Degraded(reason) => self.degraded(reason),
                _ => Next::ShutDown(ShutdownReason::StopRequested),
            };
            match next {
                Next::Running => self.transition(LoopState::Running),
                Next::Degraded(reason) => self.transition(LoopState::Degraded(reason)),
                Next::ShutDown(reason) => return reason,
            }
        }
    }

    fn running(&mut self) -> Next {
        let mut consecutive_faults = 0u32;

        loop {
            if self.stop.is_requested() {
                return Next::ShutDown(ShutdownReason::StopRequested);
            }
            if let Some(fault) = self.bank.take_fault() {
                return fatal(FatalReason::Hardware(fault));
            }

            let iteration_start = Instant::now();
            match self.source.next() {
                Ok(frame) => {
                    consecutive_faults = 0;
                    self.stats.frames += 1;
                    self.stats.total_pull_time += iteration_start.elapsed();

                    if let Err(fault) = self.act_on(&frame) {
                        return fatal(FatalReason::Hardware(fault));
                    }
                    self.log_stats();
                }
                Err(fault) if fault.is_transient() => {
                    consecutive_faults += 1;
                    self.stats.transient_faults += 1;
                    tracing::warn!(consecutive = consecutive_faults, "{}, retrying", fault);

                    if consecutive_faults >= self.settings.max_consecutive_failures {
                        return Next::Degraded(DegradedReason::PersistentFaults {
                            count: consecutive_faults,
                            last: fault,
                        });
                    }
                    if self.stop.wait(self.settings.frame_backoff) {
                        return Next::ShutDown(ShutdownReason::StopRequested);
                    }
                    continue;
                }
                Err(fault) => {
                    tracing::warn!("Detection source lost: {}", fault);
                    return Next::Degraded(DegradedReason::SourceLost(fault));
                }
            }

            // Frame rate limiting
            if let Some(interval) = self.settings.frame_interval {
                let elapsed = iteration_start.elapsed();
                if elapsed < interval && self.stop.wait(interval - elapsed) {
                    return Next::ShutDown(ShutdownReason::StopRequested);
                }
            }
        }
    }

    fn act_on(&mut self, frame: &FrameResult) -> Result<Decision, HardwareFault> {
        let decision = self
            .policy
            .evaluate(frame, self.bank.current_window(), Instant::now());

        match decision {
            Decision::StartActivation => {
                if let Some(hit) = self.policy.first_match(frame) {
                    tracing::warn!(
                        label = %hit.label,
                        confidence = hit.confidence,
                        frame = frame.sequence,
                        "Target detected, activating deterrents"
                    );
                }
                self.bank.engage(self.settings.activation_duration)?;
                self.stats.activations += 1;
            }
            Decision::ExtendActivation => {
                if self.bank.extend(self.settings.activation_duration).is_none() {
                    // Released between evaluation and now
                    self.bank.engage(self.settings.activation_duration)?;
                    self.stats.activations += 1;
                }
            }
            Decision::AlreadyActive => {
                tracing::debug!(frame = frame.sequence, "Target still present, activation outstanding");
            }
            Decision::NoAction => {}
        }

        Ok(decision)
    }

    fn degraded(&mut self, reason: DegradedReason) -> Next {
        let backoff = self.settings.reacquire;
        let mut last = reason.fault().clone();

        for attempt in 0..backoff.max_attempts {
            let delay = backoff.delay(attempt);
            tracing::info!(
                attempt = attempt + 1,
                max_attempts = backoff.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Re-acquiring detection source"
            );
            if self.stop.wait(delay) {
                return Next::ShutDown(ShutdownReason::StopRequested);
            }
            if let Some(fault) = self.bank.take_fault() {
                return fatal(FatalReason::Hardware(fault));
            }

            match self.source.reopen() {
                Ok(()) => {
                    self.stats.reacquisitions += 1;
                    tracing::info!(attempt = attempt + 1, "Detection source re-acquired");
                    return Next::Running;
                }
                Err(fault) => {
                    tracing::warn!(attempt = attempt + 1, "Re-acquisition failed: {}", fault);
                    last = fault;
                }
            }
        }

        fatal(FatalReason::ReacquisitionExhausted {
            attempts: backoff.max_attempts,
            last,
        })
    }

    fn shut_down(&mut self, reason: ShutdownReason) -> RunOutcome {
        self.transition(LoopState::ShuttingDown(reason.clone()));

        let release = self.release_with_retries();
        self.source.close();
        self.transition(LoopState::Stopped);

        RunOutcome {
            reason,
            release,
            stats: self.stats.clone(),
        }
    }

    fn release_with_retries(&self) -> Result<(), HardwareFault> {
        let attempts = self.settings.release_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.bank.release_all() {
                Ok(()) => {
                    tracing::info!("Actuators released");
                    return Ok(());
                }
                Err(fault) if attempt < attempts => {
                    tracing::error!(attempt, attempts, "Release failed: {}", fault);
                    attempt += 1;
                    thread::sleep(self.settings.release_retry_delay);
                }
                Err(fault) => {
                    tracing::error!(attempts, "Release failed, outputs may still be energized: {}", fault);
                    return Err(fault);
                }
            }
        }
    }

    fn log_stats(&self) {
        let every = self.settings.stats_every;
        if every == 0 || self.stats.frames % every != 0 {
            return;
        }
        tracing::info!(
            "Frame {}: pull={:.1}ms, activations={}, transient_faults={}, reacquisitions={}",
            self.stats.frames,
            self.stats.avg_pull_ms(),
            self.stats.activations,
            self.stats.transient_faults,
            self.stats.reacquisitions
        );
    }
}
