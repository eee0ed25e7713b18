//! Vehicle charging port
//!
//! The control loop drives the car through this trait: start/stop charging,
//! adjust the current, wake the car and read its battery state. The Tesla
//! implementation lives in [`tesla`]; [`DryRunVehicle`] wraps any client to
//! log commands instead of executing them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::get_logger;

pub mod tesla;

pub use tesla::TeslaControlClient;

/// Vehicle command failure modes
#[derive(Debug, Error)]
pub enum VehicleError {
    /// The car is offline or asleep and cannot take commands
    #[error("vehicle is offline or asleep")]
    Asleep,

    /// The command reached the car (or the transport) and failed
    #[error("command failed: {message}")]
    CommandFailed {
        message: String,
        /// Raw stderr of the command runner, when one was involved
        stderr: Option<String>,
    },

    /// Token refresh or credential problems
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },
}

impl VehicleError {
    pub fn command_failed<S: Into<String>>(message: S) -> Self {
        VehicleError::CommandFailed {
            message: message.into(),
            stderr: None,
        }
    }

    pub fn command_failed_with_stderr<S: Into<String>>(message: S, stderr: S) -> Self {
        VehicleError::CommandFailed {
            message: message.into(),
            stderr: Some(stderr.into()),
        }
    }

    pub fn authentication_failed<S: Into<String>>(message: S) -> Self {
        VehicleError::AuthenticationFailed {
            message: message.into(),
        }
    }
}

/// Battery state reported by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleChargeState {
    /// State of charge in percent
    pub battery_level: f64,

    /// Configured charge limit in percent
    pub charge_limit: f64,

    /// Energy added during the current charge, in kWh
    pub charge_energy_added: f64,
}

/// Commands and queries the controller issues against the car
#[async_trait]
pub trait VehicleClient: Send + Sync {
    async fn start_charging(&self) -> std::result::Result<(), VehicleError>;

    async fn stop_charging(&self) -> std::result::Result<(), VehicleError>;

    async fn set_ampere(&self, ampere: u32) -> std::result::Result<(), VehicleError>;

    /// Wake the car. An asleep response while waking is a command failure,
    /// never [`VehicleError::Asleep`]
    async fn wake_up(&self) -> std::result::Result<(), VehicleError>;

    async fn charge_state(&self) -> std::result::Result<VehicleChargeState, VehicleError>;

    async fn refresh_access_token(&self) -> std::result::Result<(), VehicleError>;
}

/// Decorator that logs mutations instead of performing them
///
/// Reads and token upkeep pass through to the wrapped client; a failing
/// token refresh is downgraded to a warning so a dry run works without
/// credentials.
pub struct DryRunVehicle<C> {
    inner: C,
    logger: crate::logging::StructuredLogger,
}

impl<C: VehicleClient> DryRunVehicle<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            logger: get_logger("dry_run"),
        }
    }
}

#[async_trait]
impl<C: VehicleClient> VehicleClient for DryRunVehicle<C> {
    async fn start_charging(&self) -> std::result::Result<(), VehicleError> {
        self.logger.info("Dry run: would start charging");
        Ok(())
    }

    async fn stop_charging(&self) -> std::result::Result<(), VehicleError> {
        self.logger.info("Dry run: would stop charging");
        Ok(())
    }

    async fn set_ampere(&self, ampere: u32) -> std::result::Result<(), VehicleError> {
        self.logger
            .info(&format!("Dry run: would set charging current to {} A", ampere));
        Ok(())
    }

    async fn wake_up(&self) -> std::result::Result<(), VehicleError> {
        self.logger.info("Dry run: would wake the vehicle");
        Ok(())
    }

    async fn charge_state(&self) -> std::result::Result<VehicleChargeState, VehicleError> {
        self.inner.charge_state().await
    }

    async fn refresh_access_token(&self) -> std::result::Result<(), VehicleError> {
        if let Err(e) = self.inner.refresh_access_token().await {
            self.logger
                .warn(&format!("Dry run: token refresh failed ({}), continuing", e));
        }
        Ok(())
    }
}
