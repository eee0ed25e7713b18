//! Household telemetry port
//!
//! A [`TelemetrySource`] answers two questions: what are the latest values
//! for a set of fields, and what was the lowest value of a field over a
//! trailing window. Adapters for the supported back ends live in the
//! submodules; the control loop and the strategies only ever see the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod alpha_ess;
pub mod sungather;
pub mod sungrow;

pub use alpha_ess::AlphaEssSource;
pub use sungather::SungatherSource;
pub use sungrow::SungrowSource;

/// Measurements the controller can ask a source for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Grid voltage in volts
    Voltage,
    /// Solar production in watts
    CurrentProduction,
    /// Household consumption in watts
    CurrentLoad,
    /// Energy imported from the grid today, in kWh
    DailyImport,
    /// Power currently exported to the grid, in watts
    ExportToGrid,
    /// Power currently imported from the grid, in watts
    ImportFromGrid,
}

impl Field {
    /// Every known field, in wire order
    pub const ALL: [Field; 6] = [
        Field::Voltage,
        Field::CurrentProduction,
        Field::CurrentLoad,
        Field::DailyImport,
        Field::ExportToGrid,
        Field::ImportFromGrid,
    ];

    /// Name used in queries and payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Voltage => "voltage",
            Field::CurrentProduction => "current_production",
            Field::CurrentLoad => "current_load",
            Field::DailyImport => "daily_import",
            Field::ExportToGrid => "export_to_grid",
            Field::ImportFromGrid => "import_from_grid",
        }
    }

    /// Reverse of [`Field::as_str`]
    pub fn from_wire(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One consistent set of readings
pub type TelemetrySnapshot = HashMap<Field, f64>;

/// Telemetry failure modes
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The source responded but has no recent data
    #[error("no recent data: {message}")]
    NoData { message: String },

    /// The source could not be reached
    #[error("source unreachable: {message}")]
    SourceUnavailable { message: String },
}

impl TelemetryError {
    pub fn no_data<S: Into<String>>(message: S) -> Self {
        TelemetryError::NoData {
            message: message.into(),
        }
    }

    pub fn source_unavailable<S: Into<String>>(message: S) -> Self {
        TelemetryError::SourceUnavailable {
            message: message.into(),
        }
    }
}

/// Source of household power measurements
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch the latest value for each requested field as one snapshot
    async fn query_latest_values(
        &self,
        fields: &[Field],
    ) -> std::result::Result<TelemetrySnapshot, TelemetryError>;

    /// Lowest value of a field over the trailing window
    async fn lowest_value_in_window(
        &self,
        field: Field,
        minutes: u32,
    ) -> std::result::Result<f64, TelemetryError>;
}

/// Pull a field out of a snapshot, treating absence as missing data
pub fn require_field(
    snapshot: &TelemetrySnapshot,
    field: Field,
) -> std::result::Result<f64, TelemetryError> {
    snapshot
        .get(&field)
        .copied()
        .ok_or_else(|| TelemetryError::no_data(format!("field {} missing from snapshot", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_wire_names_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_wire(field.as_str()), Some(field));
        }
        assert_eq!(Field::from_wire("unknown"), None);
    }

    #[test]
    fn test_require_field() {
        let mut snapshot = TelemetrySnapshot::new();
        snapshot.insert(Field::Voltage, 235.0);
        assert_eq!(require_field(&snapshot, Field::Voltage).unwrap(), 235.0);
        let err = require_field(&snapshot, Field::CurrentLoad).unwrap_err();
        assert!(matches!(err, TelemetryError::NoData { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = TelemetryError::source_unavailable("connect timeout");
        assert_eq!(format!("{}", err), "source unreachable: connect timeout");
    }
}
