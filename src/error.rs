//! Error types and handling for Helion
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting. Collaborator ports
//! (telemetry, vehicle, strategy, forecast) carry their own focused error
//! enums; everything funnels into [`HelionError`] at the control layer.

use thiserror::Error;

use crate::forecast::ForecastError;
use crate::strategy::StrategyError;
use crate::telemetry::TelemetryError;
use crate::vehicle::VehicleError;

/// Result type alias for Helion operations
pub type Result<T> = std::result::Result<T, HelionError>;

/// Main error type for Helion
#[derive(Debug, Error)]
pub enum HelionError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Telemetry source errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// Vehicle command/auth errors
    #[error("Vehicle error: {0}")]
    Vehicle(#[from] VehicleError),

    /// Charging speed strategy errors
    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    /// Solar forecast errors
    #[error("Forecast error: {0}")]
    Forecast(#[from] ForecastError),

    /// Solar production collapsed while waiting for a raised current to settle
    #[error(
        "Production drop: baseline {baseline_w:.0} W, production {production_w:.0} W, grid import {import_w:.0} W"
    )]
    ProductionDrop {
        baseline_w: f64,
        production_w: f64,
        import_w: f64,
    },

    /// The vehicle stayed asleep through every wake attempt
    #[error("Vehicle not waking up after {attempts} attempts")]
    VehicleNotWakingUp { attempts: u32 },

    /// The production-drop retry budget ran out; repeated drops point at a
    /// telemetry or grid fault rather than a passing cloud
    #[error("Production dropped {retries} consecutive times; supply is unstable")]
    ProductionUnstable { retries: u32 },

    /// Operation not legal in the current session state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HelionError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HelionError::Config {
            message: message.into(),
        }
    }

    /// Create a new production-drop error
    pub fn production_drop(baseline_w: f64, production_w: f64, import_w: f64) -> Self {
        HelionError::ProductionDrop {
            baseline_w,
            production_w,
            import_w,
        }
    }

    /// Create a new invalid-state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        HelionError::InvalidState {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HelionError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HelionError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        HelionError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HelionError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HelionError::Generic {
            message: message.into(),
        }
    }

    /// True when the underlying failure is the vehicle reporting asleep
    pub fn is_vehicle_asleep(&self) -> bool {
        matches!(self, HelionError::Vehicle(VehicleError::Asleep))
    }
}

impl From<std::io::Error> for HelionError {
    fn from(err: std::io::Error) -> Self {
        HelionError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HelionError {
    fn from(err: serde_yaml::Error) -> Self {
        HelionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HelionError {
    fn from(err: serde_json::Error) -> Self {
        HelionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for HelionError {
    fn from(err: reqwest::Error) -> Self {
        HelionError::network(err.to_string())
    }
}

impl From<chrono::ParseError> for HelionError {
    fn from(err: chrono::ParseError) -> Self {
        HelionError::validation("datetime", &err.to_string())
    }
}
