use super::DigitalOutput;
use crate::error::HardwareFault;

/// Output that only logs level changes, for running without hardware
pub struct DryRunOutput {
    name: String,
    level: bool,
}

impl DryRunOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: false,
        }
    }
}

impl DigitalOutput for DryRunOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&mut self, active: bool) -> Result<(), HardwareFault> {
        if active != self.level {
            tracing::info!(channel = %self.name, active, "[dry-run] output changed");
        }
        self.level = active;
        Ok(())
    }
}
