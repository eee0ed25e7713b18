//! Fixed-rate strategy
//!
//! All-or-nothing: charge at one configured current whenever the surplus
//! covers it, otherwise do not charge at all. Useful for chargers that
//! behave badly at low currents.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ChargingSpeedStrategy, StrategyError, grid_sample};
use crate::error::HelionError;
use crate::telemetry::TelemetrySource;

pub struct FixedStrategy {
    telemetry: Arc<dyn TelemetrySource>,
    fixed_ampere: u32,
    buffer_watts: f64,
}

impl FixedStrategy {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        fixed_ampere: u32,
        buffer_watts: f64,
        max_ampere: u32,
    ) -> crate::error::Result<Self> {
        if fixed_ampere > max_ampere {
            return Err(HelionError::validation(
                "strategy.fixed.ampere",
                &format!("must be at most {} amperes", max_ampere),
            ));
        }
        Ok(Self {
            telemetry,
            fixed_ampere,
            buffer_watts,
        })
    }
}

#[async_trait]
impl ChargingSpeedStrategy for FixedStrategy {
    async fn determine_charging_speed(
        &mut self,
        current_ampere: u32,
    ) -> std::result::Result<u32, StrategyError> {
        let sample = grid_sample(self.telemetry.as_ref()).await?;

        let available_w =
            sample.net_export() + current_ampere as f64 * sample.voltage - self.buffer_watts;
        let desired_w = self.fixed_ampere as f64 * sample.voltage;

        if available_w >= desired_w {
            Ok(self.fixed_ampere)
        } else {
            Ok(0)
        }
    }
}
