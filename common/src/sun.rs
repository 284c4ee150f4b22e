//! Approximate sunset times from the NOAA solar position equations.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, Offset, TimeZone};
use thiserror::Error;

/// Solar zenith of apparent sunset, allowing for refraction and the solar disc.
const SUNSET_ZENITH_DEG: f64 = 90.833;
const J2000: f64 = 2_451_545.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SunError {
    #[error("latitude {0} is out of range [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is out of range [-180, 180]")]
    Longitude(f64),
    #[error("utc offset {0}h is out of range [-12, 14]")]
    UtcOffset(f64),
    #[error("the sun does not rise on {0}")]
    NeverRises(NaiveDate),
    #[error("the sun does not set on {0}")]
    NeverSets(NaiveDate),
    #[error("sunset on {0} cannot be represented in local time")]
    Unrepresentable(NaiveDate),
}

/// Local civil time of sunset on `date` at the given location.
///
/// `utc_offset_hours` is the civil offset in force on that date, e.g. `1.0` for
/// British Summer Time.
pub fn sunset_on(
    date: NaiveDate,
    latitude: f64,
    longitude: f64,
    utc_offset_hours: f64,
) -> Result<NaiveTime, SunError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(SunError::Latitude(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(SunError::Longitude(longitude));
    }
    if !(-12.0..=14.0).contains(&utc_offset_hours) {
        return Err(SunError::UtcOffset(utc_offset_hours));
    }

    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).ok_or(SunError::Unrepresentable(date))?;
    let days = (date - epoch).num_days() as f64;
    // Julian day at local noon.
    let julian_day = J2000 + days - utc_offset_hours / 24.0;
    let position = SolarPosition::at(julian_day);

    let lat = latitude.to_radians();
    let cos_hour_angle = SUNSET_ZENITH_DEG.to_radians().cos()
        / (lat.cos() * position.declination.cos())
        - lat.tan() * position.declination.tan();
    if cos_hour_angle > 1.0 {
        return Err(SunError::NeverRises(date));
    }
    if cos_hour_angle < -1.0 {
        return Err(SunError::NeverSets(date));
    }
    let hour_angle_deg = cos_hour_angle.acos().to_degrees();

    let solar_noon_min =
        720.0 - 4.0 * longitude - position.equation_of_time_min + utc_offset_hours * 60.0;
    let sunset_min = (solar_noon_min + 4.0 * hour_angle_deg).rem_euclid(24.0 * 60.0);

    let secs = (sunset_min * 60.0).round() as u32 % 86_400;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0).ok_or(SunError::Unrepresentable(date))
}

/// Sunset `day_offset` days from today, in the system's local time zone.
pub fn sunset(latitude: f64, longitude: f64, day_offset: i64) -> Result<DateTime<Local>, SunError> {
    let day = Local::now() + Duration::days(day_offset);
    let offset_hours = f64::from(day.offset().fix().local_minus_utc()) / 3600.0;
    let date = day.date_naive();

    let time = sunset_on(date, latitude, longitude, offset_hours)?;
    Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .ok_or(SunError::Unrepresentable(date))
}

struct SolarPosition {
    declination: f64,
    equation_of_time_min: f64,
}

impl SolarPosition {
    fn at(julian_day: f64) -> Self {
        let t = (julian_day - J2000) / 36_525.0;

        let mean_long = (280.466_46 + t * (36_000.769_83 + t * 0.000_303_2)).rem_euclid(360.0);
        let mean_anomaly = 357.529_11 + t * (35_999.050_29 - 0.000_153_7 * t);
        let eccentricity = 0.016_708_634 - t * (0.000_042_037 + 0.000_000_126_7 * t);

        let m = mean_anomaly.to_radians();
        let center = m.sin() * (1.914_602 - t * (0.004_817 + 0.000_014 * t))
            + (2.0 * m).sin() * (0.019_993 - 0.000_101 * t)
            + (3.0 * m).sin() * 0.000_289;
        let true_long = mean_long + center;

        let omega = (125.04 - 1_934.136 * t).to_radians();
        let apparent_long = true_long - 0.005_69 - 0.004_78 * omega.sin();

        let mean_obliquity =
            23.0 + (26.0 + (21.448 - t * (46.815 + t * (0.000_59 - t * 0.001_813))) / 60.0) / 60.0;
        let obliquity = (mean_obliquity + 0.002_56 * omega.cos()).to_radians();

        let declination = (obliquity.sin() * apparent_long.to_radians().sin()).asin();

        let y = (obliquity / 2.0).tan().powi(2);
        let l0 = mean_long.to_radians();
        let equation_of_time = y * (2.0 * l0).sin() - 2.0 * eccentricity * m.sin()
            + 4.0 * eccentricity * y * m.sin() * (2.0 * l0).cos()
            - 0.5 * y * y * (4.0 * l0).sin()
            - 1.25 * eccentricity * eccentricity * (2.0 * m).sin();

        Self {
            declination,
            equation_of_time_min: 4.0 * equation_of_time.to_degrees(),
        }
    }
}
