//! Solar production forecasting
//!
//! The weather-aware strategy consumes probabilistic PV forecasts through the
//! [`SolarForecast`] trait. [`solcast::SolcastSource`] is the production
//! implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod solcast;

pub use solcast::SolcastSource;

/// Errors raised by forecast providers
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("forecast not available: {message}")]
    NotAvailable { message: String },
}

impl ForecastError {
    pub fn not_available<S: Into<String>>(message: S) -> Self {
        ForecastError::NotAvailable {
            message: message.into(),
        }
    }
}

/// One half-hour forecast slot
///
/// Estimates are average AC power in kW over the slot ending at `period_end`.
/// `pv_estimate10` and `pv_estimate90` are the 10th and 90th percentile bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPeriod {
    pub pv_estimate: f64,
    pub pv_estimate10: f64,
    pub pv_estimate90: f64,
    pub period_end: DateTime<Utc>,
    /// ISO 8601 duration of the slot, "PT30M" for Solcast
    pub period: String,
}

/// Forecast horizon returned by a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub periods: Vec<ForecastPeriod>,
}

impl Forecast {
    /// Periods strictly after `now`, in chronological order
    pub fn upcoming(&self, now: DateTime<Utc>) -> impl Iterator<Item = &ForecastPeriod> {
        self.periods.iter().filter(move |p| p.period_end > now)
    }
}

/// Provider of probabilistic solar production forecasts
#[async_trait]
pub trait SolarForecast: Send + Sync {
    async fn forecast(&self) -> std::result::Result<Forecast, ForecastError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn period(hour: u32, estimate: f64) -> ForecastPeriod {
        ForecastPeriod {
            pv_estimate: estimate,
            pv_estimate10: estimate * 0.6,
            pv_estimate90: estimate * 1.3,
            period_end: Utc.with_ymd_and_hms(2026, 6, 15, hour, 0, 0).unwrap(),
            period: "PT30M".to_string(),
        }
    }

    #[test]
    fn test_upcoming_filters_past_periods() {
        let forecast = Forecast {
            periods: vec![period(9, 1.0), period(12, 4.0), period(15, 2.5)],
        };
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        let upcoming: Vec<_> = forecast.upcoming(now).collect();
        assert_eq!(upcoming.len(), 1);
        assert!((upcoming[0].pv_estimate - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_display() {
        let err = ForecastError::not_available("rate limited");
        assert_eq!(err.to_string(), "forecast not available: rate limited");
    }

    #[test]
    fn test_period_round_trip() {
        let original = period(10, 3.2);
        let json = serde_json::to_string(&original).unwrap();
        let back: ForecastPeriod = serde_json::from_str(&json).unwrap();
        assert_eq!(original, back);
    }
}
