use super::DigitalOutput;
use crate::error::HardwareFault;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// GPIO line driven through the Linux sysfs interface
///
/// Writes go straight to `<root>/gpio<N>/value`.
pub struct SysfsGpio {
    name: String,
    pin: u32,
    value_path: PathBuf,
    active_low: bool,
}

impl SysfsGpio {
    /// Export the pin if needed and configure it as an inactive output
    pub fn open<P: AsRef<Path>>(
        root: P,
        name: &str,
        pin: u32,
        active_low: bool,
    ) -> Result<Self, HardwareFault> {
        let root = root.as_ref();
        let line_dir = root.join(format!("gpio{}", pin));
        tracing::info!(
            "Opening GPIO {} for `{}` at {}",
            pin,
            name,
            line_dir.display()
        );

        if !line_dir.exists() {
            write_file(&root.join("export"), &pin.to_string())
                .map_err(|e| HardwareFault::new(name, format!("export of pin {} failed: {}", pin, e)))?;
            if !line_dir.exists() {
                return Err(HardwareFault::new(
                    name,
                    format!("pin {} did not appear after export", pin),
                ));
            }
        }

        // Direction and inactive initial level in one write
        let direction = if active_low { "high" } else { "low" };
        write_file(&line_dir.join("direction"), direction).map_err(|e| {
            HardwareFault::new(name, format!("setting pin {} as output failed: {}", pin, e))
        })?;

        Ok(Self {
            name: name.to_string(),
            pin,
            value_path: line_dir.join("value"),
            active_low,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = File::options().write(true).truncate(true).open(path)?;
    file.write_all(contents.as_bytes())
}

impl DigitalOutput for SysfsGpio {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&mut self, active: bool) -> Result<(), HardwareFault> {
        let level = if active != self.active_low { "1" } else { "0" };
        write_file(&self.value_path, level).map_err(|e| {
            HardwareFault::new(
                &self.name,
                format!("write to {} failed: {}", self.value_path.display(), e),
            )
        })
    }
}
