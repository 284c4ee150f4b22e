use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use heihei_common::{GpioConfig, Level, PinBackend};
use thiserror::Error;
use tracing::{debug, warn};

const SYSFS_GPIO: &str = "/sys/class/gpio";
const EXPORT_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum PinError {
    #[error("pin {pin} set {level} failure: {source}")]
    Write {
        pin: String,
        level: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("gpio {line} could not be exported: {source}")]
    Export {
        line: u32,
        #[source]
        source: std::io::Error,
    },
}

/// A single digital output line.
pub trait OutputPin: Send {
    fn name(&self) -> &str;
    fn set_level(&mut self, level: Level) -> Result<(), PinError>;
}

/// Development backend: writes are logged and always succeed.
pub struct LogPin {
    name: String,
}

impl LogPin {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl OutputPin for LogPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_level(&mut self, level: Level) -> Result<(), PinError> {
        debug!("pin {} set {}", self.name, level.as_str());
        Ok(())
    }
}

/// Output line driven through the Linux sysfs GPIO interface.
pub struct SysfsPin {
    name: String,
    value_path: PathBuf,
}

impl SysfsPin {
    pub async fn open(name: impl Into<String>, line: u32) -> Result<Self, PinError> {
        Self::open_in(Path::new(SYSFS_GPIO), name, line).await
    }

    async fn open_in(root: &Path, name: impl Into<String>, line: u32) -> Result<Self, PinError> {
        let export = |source| PinError::Export { line, source };
        let line_dir = root.join(format!("gpio{line}"));

        if !tokio::fs::try_exists(&line_dir).await.map_err(export)? {
            tokio::fs::write(root.join("export"), line.to_string())
                .await
                .map_err(export)?;
            // udev needs a moment to fix permissions on freshly exported lines.
            tokio::time::sleep(EXPORT_SETTLE).await;
        }
        match tokio::fs::write(line_dir.join("direction"), "out").await {
            Ok(()) => {}
            // Some kernels expose lines with a fixed direction.
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(export(err)),
        }

        Ok(Self {
            name: name.into(),
            value_path: line_dir.join("value"),
        })
    }
}

impl OutputPin for SysfsPin {
    fn name(&self) -> &str {
        &self.name
    }

    // sysfs value writes complete without waiting on the device.
    fn set_level(&mut self, level: Level) -> Result<(), PinError> {
        let raw = if level.is_high() { "1" } else { "0" };
        fs::write(&self.value_path, raw).map_err(|source| PinError::Write {
            pin: self.name.clone(),
            level: level.as_str(),
            source,
        })
    }
}

/// Collects the outcome of a batch of pin writes.
///
/// Every write is attempted; the most recent failure is kept and reported once by
/// [`PinWrites::finish`].
#[derive(Debug, Default)]
pub struct PinWrites {
    last_error: Option<PinError>,
}

impl PinWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, pin: &mut dyn OutputPin) {
        self.set(pin, Level::High);
    }

    pub fn off(&mut self, pin: &mut dyn OutputPin) {
        self.set(pin, Level::Low);
    }

    pub fn set(&mut self, pin: &mut dyn OutputPin, level: Level) {
        if let Err(err) = pin.set_level(level) {
            warn!(pin = pin.name(), "{err}");
            self.last_error = Some(err);
        }
    }

    pub fn finish(self) -> Result<(), PinError> {
        match self.last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The six lines wired to the remote's encoder chip.
pub struct EncoderPins {
    pub d0: Box<dyn OutputPin>,
    pub d1: Box<dyn OutputPin>,
    pub d2: Box<dyn OutputPin>,
    pub d3: Box<dyn OutputPin>,
    pub mode: Box<dyn OutputPin>,
    pub enable: Box<dyn OutputPin>,
}

impl EncoderPins {
    pub async fn from_config(gpio: &GpioConfig) -> Result<Self, PinError> {
        Ok(Self {
            d0: open_pin(gpio.backend, "d0", gpio.d0).await?,
            d1: open_pin(gpio.backend, "d1", gpio.d1).await?,
            d2: open_pin(gpio.backend, "d2", gpio.d2).await?,
            d3: open_pin(gpio.backend, "d3", gpio.d3).await?,
            mode: open_pin(gpio.backend, "mode", gpio.mode).await?,
            enable: open_pin(gpio.backend, "enable", gpio.enable).await?,
        })
    }
}

async fn open_pin(
    backend: PinBackend,
    name: &str,
    line: u32,
) -> Result<Box<dyn OutputPin>, PinError> {
    Ok(match backend {
        PinBackend::Log => Box::new(LogPin::new(name)),
        PinBackend::Sysfs => Box::new(SysfsPin::open(name, line).await?),
    })
}
