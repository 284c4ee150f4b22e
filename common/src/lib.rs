pub mod clock;
pub mod config;
pub mod sun;
pub mod types;

pub use clock::{decode_clock, next_occurrence, ClockError, ClockTime};
pub use config::{ConfigError, Configuration, GpioConfig, Location, PinBackend};
pub use sun::{sunset, sunset_on, SunError};
pub use types::{Level, PlugCode, PlugCodeError};
