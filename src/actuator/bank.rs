use super::DigitalOutput;
use crate::error::HardwareFault;
use crate::policy::ActivationWindow;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// All deterrent outputs, switched together as one unit.
///
/// `engage` energizes every line and arms a deadline; a dedicated timer thread
/// de-energizes them when it passes, independent of whatever the caller is
/// blocked on. Every state change happens under one mutex, so engage, release
/// and the timer never interleave.
pub struct ActuatorBank {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<BankState>,
    wake: Condvar,
}

impl Shared {
    // A poisoned lock must not stop us from releasing the outputs
    fn lock(&self) -> MutexGuard<'_, BankState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct BankState {
    outputs: Vec<Box<dyn DigitalOutput>>,
    active: Option<Activation>,
    next_id: u64,
    pending_fault: Option<HardwareFault>,
    shutdown: bool,
}

#[derive(Debug, Clone, Copy)]
struct Activation {
    id: u64,
    started: Instant,
    deadline: Instant,
}

impl Activation {
    fn window(&self) -> ActivationWindow {
        ActivationWindow::new(self.started, self.deadline - self.started)
    }
}

impl BankState {
    /// Write every line, even past a failing one; returns the first fault
    fn drive_all(&mut self, active: bool) -> Result<(), HardwareFault> {
        let mut first_fault = None;
        for output in self.outputs.iter_mut() {
            if let Err(fault) = output.set(active) {
                tracing::error!(channel = %fault.channel, active, "Actuator write failed: {}", fault.message);
                first_fault.get_or_insert(fault);
            }
        }
        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn release(&mut self) -> Result<(), HardwareFault> {
        self.active = None;
        self.drive_all(false)
    }

    fn live_activation(&self, now: Instant) -> Option<Activation> {
        self.active.filter(|a| now < a.deadline)
    }
}

impl ActuatorBank {
    /// Take ownership of the outputs and start the release timer
    ///
    /// Outputs are not touched here; call `release_all` to force a known state.
    pub fn new(outputs: Vec<Box<dyn DigitalOutput>>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(BankState {
                outputs,
                active: None,
                next_id: 1,
                pending_fault: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let timer_shared = Arc::clone(&shared);
        let timer = thread::Builder::new()
            .name("actuator-timer".into())
            .spawn(move || run_timer(timer_shared))
            .map_err(|e| {
                if let Err(fault) = shared.lock().release() {
                    tracing::error!("Release after timer start failure failed: {}", fault);
                }
                e
            })?;

        Ok(Self {
            shared,
            timer: Some(timer),
        })
    }

    pub fn channel_names(&self) -> Vec<String> {
        let state = self.shared.lock();
        state.outputs.iter().map(|o| o.name().to_string()).collect()
    }

    /// Energize every output for `duration`.
    ///
    /// With an activation already outstanding this is a no-op returning a
    /// handle to it. If any line fails to go active, all lines are driven
    /// inactive again and the fault is returned. While a timer release fault
    /// is pending the bank refuses to engage and returns that fault.
    pub fn engage(&self, duration: Duration) -> Result<ActivationHandle, HardwareFault> {
        let mut state = self.shared.lock();
        let now = Instant::now();

        if let Some(fault) = &state.pending_fault {
            tracing::error!("Engage refused, release fault pending: {}", fault);
            return Err(fault.clone());
        }
        let Some(deadline) = now.checked_add(duration) else {
            return Err(HardwareFault::new(
                "bank",
                format!("activation duration {:?} out of range", duration),
            ));
        };

        if let Some(existing) = state.live_activation(now) {
            tracing::debug!(activation = existing.id, "Engage ignored, activation outstanding");
            return Ok(ActivationHandle::new(existing, &self.shared));
        }
        if let Some(expired) = state.active {
            // Deadline passed but the timer has not run yet
            tracing::debug!(activation = expired.id, "Releasing expired activation before engage");
            state.release()?;
        }

        for i in 0..state.outputs.len() {
            if let Err(fault) = state.outputs[i].set(true) {
                tracing::error!(channel = %fault.channel, "Engage failed, rolling back: {}", fault.message);
                if let Err(rollback) = state.drive_all(false) {
                    tracing::error!(
                        engage_fault = %fault,
                        "Rollback after failed engage also failed, outputs may be energized: {}",
                        rollback
                    );
                }
                return Err(fault);
            }
        }

        let activation = Activation {
            id: state.next_id,
            started: now,
            deadline,
        };
        state.next_id += 1;
        state.active = Some(activation);
        self.shared.wake.notify_all();

        tracing::info!(
            activation = activation.id,
            duration_ms = duration.as_millis() as u64,
            "Actuators engaged"
        );

        Ok(ActivationHandle::new(activation, &self.shared))
    }

    /// Push the outstanding activation's deadline to `now + duration`
    ///
    /// Returns the refreshed window, `None` if nothing is outstanding, a
    /// release fault is pending, or the new deadline is out of range.
    pub fn extend(&self, duration: Duration) -> Option<ActivationWindow> {
        let mut state = self.shared.lock();
        if state.pending_fault.is_some() {
            return None;
        }
        let now = Instant::now();
        let mut activation = state.live_activation(now)?;
        activation.deadline = now.checked_add(duration)?;
        state.active = Some(activation);
        self.shared.wake.notify_all();

        tracing::debug!(activation = activation.id, "Activation extended");
        Some(activation.window())
    }

    /// Drive every output inactive, outstanding activation or not
    pub fn release_all(&self) -> Result<(), HardwareFault> {
        let mut state = self.shared.lock();
        if let Some(activation) = state.active {
            tracing::info!(activation = activation.id, "Forced release of actuators");
        }
        let result = state.release();
        self.shared.wake.notify_all();
        result
    }

    pub fn is_engaged(&self) -> bool {
        self.shared.lock().live_activation(Instant::now()).is_some()
    }

    /// The outstanding activation, if its deadline has not passed
    pub fn current_window(&self) -> Option<ActivationWindow> {
        self.shared
            .lock()
            .live_activation(Instant::now())
            .map(|a| a.window())
    }

    /// Fault raised by the timer thread during an automatic release
    pub fn take_fault(&self) -> Option<HardwareFault> {
        self.shared.lock().pending_fault.take()
    }
}

impl Drop for ActuatorBank {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            if let Err(fault) = state.release() {
                tracing::error!("Final actuator release failed: {}", fault);
            }
            self.shared.wake.notify_all();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

fn run_timer(shared: Arc<Shared>) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }
        let Some(activation) = state.active else {
            state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let now = Instant::now();
        if now >= activation.deadline {
            tracing::info!(
                activation = activation.id,
                held_ms = (now - activation.started).as_millis() as u64,
                "Activation window elapsed, releasing actuators"
            );
            if let Err(fault) = state.release() {
                state.pending_fault = Some(fault);
            }
        } else {
            let (guard, _) = shared
                .wake
                .wait_timeout(state, activation.deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

/// Handle to one activation, allowing explicit early release
#[derive(Debug, Clone)]
pub struct ActivationHandle {
    id: u64,
    window: ActivationWindow,
    shared: Weak<Shared>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Shared")
    }
}

impl ActivationHandle {
    fn new(activation: Activation, shared: &Arc<Shared>) -> Self {
        Self {
            id: activation.id,
            window: activation.window(),
            shared: Arc::downgrade(shared),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Window as it was when the handle was issued
    pub fn window(&self) -> ActivationWindow {
        self.window
    }

    /// Whether this activation is still the outstanding one
    pub fn is_active(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| {
            shared
                .lock()
                .live_activation(Instant::now())
                .is_some_and(|a| a.id == self.id)
        })
    }

    /// Release early. No-op if this activation already ended.
    pub fn release(&self) -> Result<(), HardwareFault> {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };
        let mut state = shared.lock();
        match state.active {
            Some(a) if a.id == self.id => {
                tracing::info!(activation = self.id, "Early release of actuators");
                let result = state.release();
                shared.wake.notify_all();
                result
            }
            _ => Ok(()),
        }
    }
}
