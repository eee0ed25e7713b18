//! Smoothing decorator
//!
//! Some telemetry backends return the same sample across several polls.
//! Counting such a repeat as confirmation would let a single optimistic
//! reading ratchet the current up. This wrapper fingerprints the raw grid
//! sample, applies decreases immediately, and releases an increase only
//! after enough distinct fresh readings agree that more power is there.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ChargingSpeedStrategy, StrategyError, grid_sample};
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::TelemetrySource;

/// Bit-exact fingerprint of one grid sample
type Signature = [u64; 3];

pub struct SmoothingStrategy {
    inner: Box<dyn ChargingSpeedStrategy>,
    telemetry: Arc<dyn TelemetrySource>,
    required_consistent_reads: u32,
    pending_increases: Vec<u32>,
    last_signature: Option<Signature>,
    logger: StructuredLogger,
}

impl SmoothingStrategy {
    pub fn new(
        inner: Box<dyn ChargingSpeedStrategy>,
        telemetry: Arc<dyn TelemetrySource>,
        required_consistent_reads: u32,
    ) -> Self {
        Self {
            inner,
            telemetry,
            required_consistent_reads: required_consistent_reads.max(1),
            pending_increases: Vec::new(),
            last_signature: None,
            logger: get_logger("strategy.smoothing"),
        }
    }
}

#[async_trait]
impl ChargingSpeedStrategy for SmoothingStrategy {
    async fn determine_charging_speed(
        &mut self,
        current_ampere: u32,
    ) -> std::result::Result<u32, StrategyError> {
        let sample = grid_sample(self.telemetry.as_ref()).await?;
        let signature: Signature = [
            sample.voltage.to_bits(),
            sample.export_w.to_bits(),
            sample.import_w.to_bits(),
        ];
        let fresh = self.last_signature != Some(signature);
        self.last_signature = Some(signature);

        let candidate = self.inner.determine_charging_speed(current_ampere).await?;

        if candidate <= current_ampere {
            // Safety first: any lower reading applies at once, stale or not
            self.pending_increases.clear();
            return Ok(candidate);
        }

        if !fresh {
            self.logger.debug(&format!(
                "Ignoring increase to {} A from a repeated sample",
                candidate
            ));
            return Ok(current_ampere);
        }

        self.pending_increases.push(candidate);
        if self.pending_increases.len() < self.required_consistent_reads as usize {
            self.logger.debug(&format!(
                "Holding {} A, increase pending ({}/{})",
                current_ampere,
                self.pending_increases.len(),
                self.required_consistent_reads
            ));
            return Ok(current_ampere);
        }

        let released = self
            .pending_increases
            .iter()
            .copied()
            .min()
            .unwrap_or(current_ampere);
        self.pending_increases.clear();
        Ok(released)
    }
}
