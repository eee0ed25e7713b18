//! Aggressive excess-solar strategy
//!
//! Targets zero grid exchange: everything exported beyond a fixed safety
//! buffer goes into the car. The buffer protects against flickering into
//! grid import around the rounding edges.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ChargingSpeedStrategy, StrategyError, excess_to_ampere, grid_sample};
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::TelemetrySource;

pub struct AggressiveStrategy {
    telemetry: Arc<dyn TelemetrySource>,
    buffer_watts: f64,
    multiple_of: u32,
    max_ampere: u32,
    logger: StructuredLogger,
}

impl AggressiveStrategy {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        buffer_watts: f64,
        multiple_of: u32,
        max_ampere: u32,
    ) -> Self {
        Self {
            telemetry,
            buffer_watts,
            multiple_of,
            max_ampere,
            logger: get_logger("strategy.aggressive"),
        }
    }
}

#[async_trait]
impl ChargingSpeedStrategy for AggressiveStrategy {
    async fn determine_charging_speed(
        &mut self,
        current_ampere: u32,
    ) -> std::result::Result<u32, StrategyError> {
        let sample = grid_sample(self.telemetry.as_ref()).await?;

        // The car's own draw counts as available: it would flow to the grid
        // if charging stopped.
        let excess_w =
            sample.net_export() - self.buffer_watts + current_ampere as f64 * sample.voltage;
        if excess_w > 0.0 {
            self.logger.debug(&format!(
                "Excess solar {:.0} W (net export {:.0} W)",
                excess_w,
                sample.net_export()
            ));
        }

        Ok(excess_to_ampere(
            excess_w,
            sample.voltage,
            self.multiple_of,
            self.max_ampere,
        ))
    }
}
