//! Charging speed strategies
//!
//! A strategy turns telemetry into a desired charging current, given the
//! current that is applied right now. Implementations are interchangeable
//! and selected by configuration; decorators (`smoothing`) wrap another
//! strategy through the same trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::telemetry::{Field, TelemetryError, TelemetrySource};

pub mod aggressive;
pub mod conservative;
pub mod feed_in;
pub mod fixed;
pub mod smoothing;
pub mod weather;

pub use aggressive::AggressiveStrategy;
pub use conservative::ConservativeStrategy;
pub use feed_in::FeedInStrategy;
pub use fixed::FixedStrategy;
pub use smoothing::SmoothingStrategy;
pub use weather::WeatherStrategy;

/// Errors raised while determining a charging speed
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("inadequate data: {message}")]
    InadequateData { message: String },
}

impl StrategyError {
    pub fn inadequate_data<S: Into<String>>(message: S) -> Self {
        StrategyError::InadequateData {
            message: message.into(),
        }
    }
}

impl From<TelemetryError> for StrategyError {
    fn from(err: TelemetryError) -> Self {
        StrategyError::inadequate_data(err.to_string())
    }
}

/// Decision function from applied current to desired current
#[async_trait]
pub trait ChargingSpeedStrategy: Send + Sync {
    /// `current_ampere` is what the controller believes is applied right
    /// now (0 when not charging). Returns the desired current in amperes.
    async fn determine_charging_speed(
        &mut self,
        current_ampere: u32,
    ) -> std::result::Result<u32, StrategyError>;
}

/// Instantaneous grid reading shared by the excess-solar strategies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSample {
    pub voltage: f64,
    pub export_w: f64,
    pub import_w: f64,
}

impl GridSample {
    pub fn net_export(&self) -> f64 {
        self.export_w - self.import_w
    }
}

pub(crate) async fn grid_sample(
    telemetry: &dyn TelemetrySource,
) -> std::result::Result<GridSample, StrategyError> {
    let snapshot = telemetry
        .query_latest_values(&[Field::Voltage, Field::ExportToGrid, Field::ImportFromGrid])
        .await?;
    Ok(GridSample {
        voltage: crate::telemetry::require_field(&snapshot, Field::Voltage)?,
        export_w: crate::telemetry::require_field(&snapshot, Field::ExportToGrid)?,
        import_w: crate::telemetry::require_field(&snapshot, Field::ImportFromGrid)?,
    })
}

/// Convert excess power into a charging current, stepping down to a
/// multiple of `multiple_of` and capping at `max_ampere`
pub(crate) fn excess_to_ampere(
    excess_w: f64,
    voltage: f64,
    multiple_of: u32,
    max_ampere: u32,
) -> u32 {
    if voltage <= 0.0 {
        return 0;
    }
    let ampere = excess_w / voltage;
    if ampere >= max_ampere as f64 {
        return max_ampere;
    }
    let step = multiple_of.max(1) as f64;
    let stepped = (ampere / step).floor() * step;
    if stepped <= 0.0 { 0 } else { stepped as u32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excess_to_ampere_steps_down() {
        // 2500 W at 230 V is 10.9 A, stepped down to 9 with multiples of 3
        assert_eq!(excess_to_ampere(2500.0, 230.0, 3, 32), 9);
        assert_eq!(excess_to_ampere(2070.0, 230.0, 3, 32), 9);
        assert_eq!(excess_to_ampere(2069.0, 230.0, 3, 32), 6);
    }

    #[test]
    fn test_excess_to_ampere_caps_at_ceiling() {
        assert_eq!(excess_to_ampere(10000.0, 230.0, 3, 32), 32);
        // 32 A exactly hits the cap rather than stepping down to 30
        assert_eq!(excess_to_ampere(32.0 * 230.0, 230.0, 3, 32), 32);
    }

    #[test]
    fn test_excess_to_ampere_clamps_negative() {
        assert_eq!(excess_to_ampere(-500.0, 230.0, 3, 32), 0);
        assert_eq!(excess_to_ampere(0.0, 230.0, 3, 32), 0);
    }

    #[test]
    fn test_excess_to_ampere_guards_zero_voltage() {
        assert_eq!(excess_to_ampere(2500.0, 0.0, 3, 32), 0);
    }

    #[test]
    fn test_net_export() {
        let sample = GridSample {
            voltage: 230.0,
            export_w: 1200.0,
            import_w: 300.0,
        };
        assert!((sample.net_export() - 900.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_telemetry_errors_map_to_inadequate_data() {
        let err: StrategyError = TelemetryError::no_data("empty result set").into();
        assert!(
            err.to_string()
                .contains("no recent data: empty result set")
        );
    }
}
