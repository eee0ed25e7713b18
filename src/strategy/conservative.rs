//! Conservative excess-solar strategy
//!
//! Sizes the target from the lowest production seen over a trailing window
//! instead of the instantaneous reading. Slower to ramp up after a passing
//! cloud, but far less likely to have to ramp down again.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ChargingSpeedStrategy, StrategyError};
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::{Field, TelemetrySource, require_field};

pub struct ConservativeStrategy {
    telemetry: Arc<dyn TelemetrySource>,
    buffer_watts: f64,
    window_minutes: u32,
    logger: StructuredLogger,
}

impl ConservativeStrategy {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        buffer_watts: f64,
        window_minutes: u32,
    ) -> Self {
        Self {
            telemetry,
            buffer_watts,
            window_minutes,
            logger: get_logger("strategy.conservative"),
        }
    }
}

#[async_trait]
impl ChargingSpeedStrategy for ConservativeStrategy {
    async fn determine_charging_speed(
        &mut self,
        current_ampere: u32,
    ) -> std::result::Result<u32, StrategyError> {
        let snapshot = self
            .telemetry
            .query_latest_values(&[Field::Voltage, Field::CurrentLoad])
            .await?;
        let voltage = require_field(&snapshot, Field::Voltage)?;
        let load_w = require_field(&snapshot, Field::CurrentLoad)?;
        let lowest_production_w = self
            .telemetry
            .lowest_value_in_window(Field::CurrentProduction, self.window_minutes)
            .await?;

        if voltage <= 0.0 {
            return Ok(0);
        }

        // Household load already includes the car's draw, so add it back
        let available_w =
            lowest_production_w - load_w - self.buffer_watts + current_ampere as f64 * voltage;
        let desired = (available_w / voltage).floor();
        self.logger.debug(&format!(
            "Window minimum {:.0} W, load {:.0} W, available {:.0} W",
            lowest_production_w, load_w, available_w
        ));

        Ok(if desired <= 0.0 { 0 } else { desired as u32 })
    }
}
