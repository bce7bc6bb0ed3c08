mod bank;
mod dry_run;
mod sysfs;

pub use bank::{ActivationHandle, ActuatorBank};
pub use dry_run::DryRunOutput;
pub use sysfs::SysfsGpio;

use crate::error::HardwareFault;

/// Trait for digital output lines driving a deterrent
///
/// Implementations only know "active" and "inactive"; polarity, pin numbers
/// and the device interface are their own business.
pub trait DigitalOutput: Send {
    /// Channel name used in logs and faults
    fn name(&self) -> &str;

    /// Drive the line active (`true`) or inactive (`false`)
    fn set(&mut self, active: bool) -> Result<(), HardwareFault>;
}

/// Open every output, or none.
///
/// When one fails to open, the ones already opened are driven inactive
/// before the fault is returned.
pub fn open_all<T, F>(entries: &[T], mut open: F) -> Result<Vec<Box<dyn DigitalOutput>>, HardwareFault>
where
    F: FnMut(&T) -> Result<Box<dyn DigitalOutput>, HardwareFault>,
{
    let mut opened: Vec<Box<dyn DigitalOutput>> = Vec::with_capacity(entries.len());
    for entry in entries {
        match open(entry) {
            Ok(output) => opened.push(output),
            Err(fault) => {
                tracing::error!("Failed to open actuator: {}", fault);
                for output in opened.iter_mut() {
                    if let Err(release) = output.set(false) {
                        tracing::error!("Release of `{}` failed: {}", output.name(), release.message);
                    }
                }
                return Err(fault);
            }
        }
    }
    Ok(opened)
}
