//! Production-drop watchdog
//!
//! Raising the charging current is only safe while the roof keeps producing
//! what the baseline promised. While an increase settles, the watchdog races
//! a timer against a telemetry poll loop: if the household starts importing
//! from the grid, or production falls more than the buffer below the
//! baseline, the settle window is aborted immediately instead of waited out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::{HelionError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::{Field, TelemetrySource, require_field};

pub struct ProductionWatchdog {
    telemetry: Arc<dyn TelemetrySource>,
    buffer_watts: f64,
    poll_interval: Duration,
    logger: StructuredLogger,
}

impl ProductionWatchdog {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        buffer_watts: f64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            telemetry,
            buffer_watts,
            poll_interval,
            logger: get_logger("watchdog"),
        }
    }

    /// Wait out a settle window while watching for a production drop.
    ///
    /// Returns `Ok(())` when `settle` elapses with supply intact. Fails with
    /// [`HelionError::ProductionDrop`] the moment a poll sees grid import or
    /// production below `baseline_w` minus the buffer. Telemetry failures
    /// inside the watch arm propagate as telemetry errors. Whichever arm
    /// loses the race is dropped, cancelling its in-flight sleep or query.
    pub async fn settle(&self, baseline_w: f64, settle: Duration) -> Result<()> {
        tokio::select! {
            _ = sleep(settle) => {
                self.logger.debug(&format!(
                    "Settled for {:.1} s without a production drop",
                    settle.as_secs_f64()
                ));
                Ok(())
            }
            result = self.watch(baseline_w) => result,
        }
    }

    /// Poll production and grid import until one of them signals a drop
    async fn watch(&self, baseline_w: f64) -> Result<()> {
        loop {
            sleep(self.poll_interval).await;

            let snapshot = self
                .telemetry
                .query_latest_values(&[Field::CurrentProduction, Field::ImportFromGrid])
                .await?;
            let production = require_field(&snapshot, Field::CurrentProduction)?;
            let import = require_field(&snapshot, Field::ImportFromGrid)?;

            if import > 0.0 || production < baseline_w - self.buffer_watts {
                self.logger.warn(&format!(
                    "Production dropped while settling: baseline {:.0} W, now {:.0} W, grid import {:.0} W",
                    baseline_w, production, import
                ));
                return Err(HelionError::production_drop(baseline_w, production, import));
            }
        }
    }
}
