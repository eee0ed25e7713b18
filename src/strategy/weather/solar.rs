//! Solar position model
//!
//! First-order astronomy only: declination from day of year, sunrise and
//! sunset from the hour-angle formula, and a cosine-squared bell curve for
//! intra-day capacity. Accurate to well under half an hour, which is all
//! the buffer sizing needs.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::f64::consts::PI;

/// Sunrise and sunset as fractional hours (6.5 is 06:30)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunTimes {
    pub sunrise: f64,
    pub sunset: f64,
}

fn declination_rad(day_of_year: u32) -> f64 {
    (23.45_f64).to_radians() * (2.0 * PI * (284.0 + day_of_year as f64) / 365.0).sin()
}

pub fn sun_times(date: NaiveDate, latitude: f64) -> SunTimes {
    let declination = declination_rad(date.ordinal());
    let latitude_rad = latitude.to_radians();
    let cos_hour_angle = -latitude_rad.tan() * declination.tan();

    if cos_hour_angle >= 1.0 {
        // Polar night
        return SunTimes {
            sunrise: 12.0,
            sunset: 12.0,
        };
    }
    if cos_hour_angle <= -1.0 {
        // Polar day
        return SunTimes {
            sunrise: 0.0,
            sunset: 24.0,
        };
    }

    let hour_angle_deg = cos_hour_angle.acos().to_degrees();
    SunTimes {
        sunrise: 12.0 - hour_angle_deg / 15.0,
        sunset: 12.0 + hour_angle_deg / 15.0,
    }
}

/// Relative peak capacity per month, derived from the noon solar elevation
/// on the 15th, normalized so the best month is 1.0
pub fn default_monthly_peak_factors(latitude: f64) -> Vec<f64> {
    let mut factors = Vec::with_capacity(12);
    for month in 1..=12 {
        let day_of_year = NaiveDate::from_ymd_opt(2024, month, 15)
            .map(|d| d.ordinal())
            .unwrap_or(1);
        let declination_deg = declination_rad(day_of_year).to_degrees();
        let elevation_deg = 90.0 - (latitude - declination_deg).abs();
        factors.push(elevation_deg.to_radians().sin().max(0.0));
    }

    let max = factors.iter().copied().fold(0.0_f64, f64::max);
    if max > 0.0 {
        factors.iter().map(|f| f / max).collect()
    } else {
        vec![1.0; 12]
    }
}

/// Expected AC capacity in kW for a given date and fractional hour
pub fn expected_capacity_kw(
    date: NaiveDate,
    hour: f64,
    latitude: f64,
    peak_kw: f64,
    monthly_factors: &[f64],
) -> f64 {
    let times = sun_times(date, latitude);
    if hour < times.sunrise || hour > times.sunset {
        return 0.0;
    }

    let half_span = (times.sunset - times.sunrise) / 2.0;
    if half_span <= 0.0 {
        return 0.0;
    }
    let solar_noon = (times.sunrise + times.sunset) / 2.0;
    let hour_angle = (hour - solar_noon) / half_span;
    let daily_shape = ((hour_angle * PI / 2.0).cos()).powi(2);

    let month_factor = monthly_factors
        .get(date.month0() as usize)
        .copied()
        .unwrap_or(1.0);
    peak_kw * month_factor * daily_shape
}

/// Fractional hour of a forecast timestamp, read off the UTC clock face.
/// TODO: convert to the site's timezone instead of treating UTC as local
/// solar time; works at longitude ~0 and self-corrects via confidence
/// elsewhere, but shifts the capacity curve.
pub fn local_solar_hour(at: DateTime<Utc>) -> f64 {
    at.hour() as f64 + at.minute() as f64 / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equinox_is_twelve_hours_of_daylight() {
        // Day 81 has zero declination, so sunrise and sunset land on
        // 06:00/18:00 at any non-polar latitude
        let date = NaiveDate::from_ymd_opt(2026, 3, 22).unwrap();
        assert_eq!(date.ordinal(), 81);
        let times = sun_times(date, 52.0);
        assert!((times.sunrise - 6.0).abs() < 0.01);
        assert!((times.sunset - 18.0).abs() < 0.01);
    }

    #[test]
    fn test_midsummer_days_are_long_at_52_north() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 21).unwrap();
        let times = sun_times(date, 52.0);
        assert!(times.sunrise < 4.5);
        assert!(times.sunset > 19.5);
    }

    #[test]
    fn test_polar_night_and_day() {
        let winter = NaiveDate::from_ymd_opt(2026, 12, 21).unwrap();
        let night = sun_times(winter, 80.0);
        assert_eq!(night.sunrise, 12.0);
        assert_eq!(night.sunset, 12.0);

        let summer = NaiveDate::from_ymd_opt(2026, 6, 21).unwrap();
        let day = sun_times(summer, 80.0);
        assert_eq!(day.sunrise, 0.0);
        assert_eq!(day.sunset, 24.0);
    }

    #[test]
    fn test_monthly_factors_peak_in_summer() {
        let factors = default_monthly_peak_factors(52.0);
        assert_eq!(factors.len(), 12);
        // June is the reference month at northern mid-latitudes
        assert!((factors[5] - 1.0).abs() < 1e-9);
        assert!(factors[11] > 0.2 && factors[11] < 0.35);
        assert!(factors.iter().all(|f| (0.0..=1.0).contains(f)));
    }

    #[test]
    fn test_capacity_bell_curve() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 22).unwrap();
        let flat = vec![1.0; 12];

        // Full capacity at solar noon, half at the cos^2 quarter points
        let noon = expected_capacity_kw(date, 12.0, 52.0, 8.0, &flat);
        assert!((noon - 8.0).abs() < 0.01);
        let morning = expected_capacity_kw(date, 9.0, 52.0, 8.0, &flat);
        assert!((morning - 4.0).abs() < 0.05);

        assert_eq!(expected_capacity_kw(date, 5.0, 52.0, 8.0, &flat), 0.0);
        assert_eq!(expected_capacity_kw(date, 19.0, 52.0, 8.0, &flat), 0.0);
    }

    #[test]
    fn test_local_solar_hour_fraction() {
        let at: DateTime<Utc> = "2026-06-15T10:30:00Z".parse().unwrap();
        assert!((local_solar_hour(at) - 10.5).abs() < f64::EPSILON);
    }
}
