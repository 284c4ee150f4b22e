use std::io::Read;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{clock::ClockTime, types::PlugCode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("location is missing from configuration")]
    MissingLocation,
    #[error("lights out is missing from configuration")]
    MissingLightsOut,
    #[error("lights out value from configuration decoding error; {0}")]
    LightsOut(#[from] crate::clock::ClockError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinBackend {
    /// Log every write instead of touching hardware.
    Log,
    /// Linux `/sys/class/gpio` lines.
    Sysfs,
}

impl PinBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Sysfs => "sysfs",
        }
    }
}

/// GPIO line numbers of the remote's encoder chip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GpioConfig {
    pub backend: PinBackend,
    pub d0: u32,
    pub d1: u32,
    pub d2: u32,
    pub d3: u32,
    pub mode: u32,
    pub enable: u32,
}

impl Default for GpioConfig {
    fn default() -> Self {
        // BCM numbering of header pins 11, 15, 16, 13, 18 and 22.
        Self {
            backend: PinBackend::Log,
            d0: 17,
            d1: 22,
            d2: 23,
            d3: 27,
            mode: 24,
            enable: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Configuration {
    pub location: Location,
    pub lights_out: ClockTime,
    pub log_to_stdout: bool,
    pub light: PlugCode,
    pub gpio: GpioConfig,
}

/// On-disk shape; required values are optional here so their absence is reported by name.
#[derive(Debug, Deserialize)]
struct RawConfiguration {
    location: Option<[f64; 2]>,
    lights_out: Option<String>,
    #[serde(default)]
    log_to_stdout: bool,
    #[serde(default = "default_light")]
    light: PlugCode,
    #[serde(default)]
    gpio: GpioConfig,
}

fn default_light() -> PlugCode {
    PlugCode::One
}

impl Configuration {
    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        let raw: RawConfiguration = serde_json::from_reader(reader)?;
        Self::from_raw(raw)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfiguration = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfiguration) -> Result<Self, ConfigError> {
        let [latitude, longitude] = raw.location.ok_or(ConfigError::MissingLocation)?;
        let lights_out = raw
            .lights_out
            .ok_or(ConfigError::MissingLightsOut)?
            .parse::<ClockTime>()?;

        Ok(Self {
            location: Location {
                latitude,
                longitude,
            },
            lights_out,
            log_to_stdout: raw.log_to_stdout,
            light: raw.light,
            gpio: raw.gpio,
        })
    }

    pub fn lat_long(&self) -> (f64, f64) {
        (self.location.latitude, self.location.longitude)
    }
}
