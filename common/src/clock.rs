use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock string {0} has an unsupported syntax")]
    Syntax(String),
    #[error("clock hours {0} are out of bounds")]
    Hour(u32),
    #[error("clock minutes {0} are out of bounds")]
    Minute(u32),
    #[error("{0} does not exist in the local time zone")]
    Nonexistent(String),
}

/// A wall-clock time of day with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(NaiveTime);

impl ClockTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ClockError> {
        if hour > 23 {
            return Err(ClockError::Hour(hour));
        }
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or(ClockError::Minute(minute))
    }

    pub fn hour(self) -> u32 {
        self.0.hour()
    }

    pub fn minute(self) -> u32 {
        self.0.minute()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for ClockTime {
    type Err = ClockError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = decode_clock(input)?;
        Self::new(hour, minute)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Splits `H:MM` or `HH:MM` into hours and minutes.
///
/// No normalisation happens: `25:10` or `5:70` are errors, not wrapped values.
pub fn decode_clock(input: &str) -> Result<(u32, u32), ClockError> {
    let syntax = || ClockError::Syntax(input.to_string());

    let (hours, minutes) = input.split_once(':').ok_or_else(syntax)?;
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if !(1..=2).contains(&hours.len())
        || minutes.len() != 2
        || !all_digits(hours)
        || !all_digits(minutes)
    {
        return Err(syntax());
    }

    let hour = hours.parse::<u32>().map_err(|_| syntax())?;
    let minute = minutes.parse::<u32>().map_err(|_| syntax())?;
    let clock = ClockTime::new(hour, minute)?;
    Ok((clock.hour(), clock.minute()))
}

/// First instant at `hour:minute` on or after `base`, staying in `base`'s zone.
pub fn next_occurrence<Tz: TimeZone>(
    base: &DateTime<Tz>,
    hour: u32,
    minute: u32,
) -> Result<DateTime<Tz>, ClockError> {
    let ClockTime(time) = ClockTime::new(hour, minute)?;

    let mut date = base.date_naive();
    if date.and_time(time) < base.naive_local() {
        date += Duration::days(1);
    }

    let naive = date.and_time(time);
    base.timezone()
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ClockError::Nonexistent(naive.to_string()))
}
