use std::time::Duration;

/// Exponential re-acquisition schedule with a cap and an attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    /// Delay before attempt `attempt` (0-based): `initial * 2^attempt`, capped at `max`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
