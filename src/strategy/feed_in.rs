//! Feed-in-capped strategy
//!
//! For plants on a feed-in tariff with a cap: export up to the allowed
//! maximum and divert only what would be curtailed beyond it into the car.
//! Rounds up so the cap is respected even between steps.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ChargingSpeedStrategy, StrategyError, grid_sample};
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::TelemetrySource;

pub struct FeedInStrategy {
    telemetry: Arc<dyn TelemetrySource>,
    max_feed_in_watts: f64,
    logger: StructuredLogger,
}

impl FeedInStrategy {
    pub fn new(telemetry: Arc<dyn TelemetrySource>, max_feed_in_watts: f64) -> Self {
        Self {
            telemetry,
            max_feed_in_watts,
            logger: get_logger("strategy.feed_in"),
        }
    }
}

#[async_trait]
impl ChargingSpeedStrategy for FeedInStrategy {
    async fn determine_charging_speed(
        &mut self,
        current_ampere: u32,
    ) -> std::result::Result<u32, StrategyError> {
        let sample = grid_sample(self.telemetry.as_ref()).await?;
        if sample.voltage <= 0.0 {
            return Ok(0);
        }

        let produced_beyond_load_w = sample.net_export() + current_ampere as f64 * sample.voltage;
        let wasted_w = produced_beyond_load_w - self.max_feed_in_watts;
        self.logger.debug(&format!(
            "Net export {:.0} W, beyond feed-in cap {:.0} W",
            sample.net_export(),
            wasted_w
        ));

        // Round up to an even current so the feed-in stays under the cap
        let desired = ((wasted_w / sample.voltage) / 2.0).ceil() * 2.0;
        Ok(if desired <= 0.0 { 0 } else { desired as u32 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Field, TelemetryError, TelemetrySnapshot};

    struct FixedTelemetry {
        voltage: f64,
        export_w: f64,
        import_w: f64,
    }

    #[async_trait]
    impl TelemetrySource for FixedTelemetry {
        async fn query_latest_values(
            &self,
            fields: &[Field],
        ) -> std::result::Result<TelemetrySnapshot, TelemetryError> {
            let mut snapshot = TelemetrySnapshot::new();
            for field in fields {
                let value = match field {
                    Field::Voltage => self.voltage,
                    Field::ExportToGrid => self.export_w,
                    Field::ImportFromGrid => self.import_w,
                    _ => 0.0,
                };
                snapshot.insert(*field, value);
            }
            Ok(snapshot)
        }

        async fn lowest_value_in_window(
            &self,
            _field: Field,
            _minutes: u32,
        ) -> std::result::Result<f64, TelemetryError> {
            Err(TelemetryError::no_data("no history"))
        }
    }

    #[tokio::test]
    async fn test_diverts_power_beyond_the_cap() {
        // Exporting 3000 W against a 2000 W cap: 1000 W over is 4.35 A,
        // rounded up to the next even value
        let mut strategy = FeedInStrategy::new(
            Arc::new(FixedTelemetry {
                voltage: 230.0,
                export_w: 3000.0,
                import_w: 0.0,
            }),
            2000.0,
        );
        assert_eq!(strategy.determine_charging_speed(0).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_under_the_cap_means_no_charging() {
        let mut strategy = FeedInStrategy::new(
            Arc::new(FixedTelemetry {
                voltage: 230.0,
                export_w: 1500.0,
                import_w: 0.0,
            }),
            2000.0,
        );
        assert_eq!(strategy.determine_charging_speed(0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_own_draw_counts_toward_production() {
        // Charging at 6 A with exports right at the cap: production beyond
        // load is 2000 + 1380 W, still 1380 W over the cap, keeps 6 A
        let mut strategy = FeedInStrategy::new(
            Arc::new(FixedTelemetry {
                voltage: 230.0,
                export_w: 2000.0,
                import_w: 0.0,
            }),
            2000.0,
        );
        assert_eq!(strategy.determine_charging_speed(6).await.unwrap(), 6);
    }
}
