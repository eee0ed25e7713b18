//! Charging session accounting for Helion
//!
//! This module tracks a single charging session: when it started, how the
//! applied current moved over time, and how much of the charged energy came
//! from the grid versus the roof. The control loop owns one
//! [`SessionTracker`] per run and turns it into a [`SessionSummary`] on
//! shutdown.

use crate::logging::get_logger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a charging session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Controller constructed but not started
    Pending,

    /// Control loop is running
    Running,

    /// Session ended; terminal
    Stopped,
}

/// End-of-session report emitted through the event sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Wall-clock session length in milliseconds
    pub duration_ms: u64,

    /// Energy added to the vehicle battery (kWh), 0 when unknown
    pub total_energy_charged_kwh: f64,

    /// Grid import counter delta over the session (kWh), 0 when unknown
    pub grid_import_kwh: f64,

    /// Charged energy not covered by grid import (kWh)
    pub solar_energy_used_kwh: f64,

    /// Time-weighted mean of the applied current
    pub average_charging_speed_amps: f64,

    /// Number of applied current changes
    pub ampere_fluctuations: u32,

    /// Grid import valued at the configured rate
    pub grid_import_cost: f64,
}

/// Per-session bookkeeping
pub struct SessionTracker {
    /// Unique session ID
    id: String,

    started_at: DateTime<Utc>,

    /// Daily grid import counter at session start, when it could be read
    import_at_start: Option<f64>,

    /// Integral of applied current over time
    amp_seconds: f64,

    /// Currently applied current
    ampere: u32,

    /// When `ampere` last changed
    last_change_at: DateTime<Utc>,

    fluctuations: u32,

    cost_per_kwh: f64,

    logger: crate::logging::StructuredLogger,
}

impl SessionTracker {
    /// Start tracking a new session now
    pub fn new(cost_per_kwh: f64) -> Self {
        Self::starting_at(cost_per_kwh, Utc::now())
    }

    /// Start tracking a new session at an explicit instant
    pub fn starting_at(cost_per_kwh: f64, started_at: DateTime<Utc>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let logger = get_logger("session");
        logger.info(&format!("Started charging session {}", id));
        Self {
            id,
            started_at,
            import_at_start: None,
            amp_seconds: 0.0,
            ampere: 0,
            last_change_at: started_at,
            fluctuations: 0,
            cost_per_kwh,
            logger,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fluctuations(&self) -> u32 {
        self.fluctuations
    }

    /// Remember the grid import counter position at session start
    pub fn set_import_at_start(&mut self, kwh: f64) {
        self.import_at_start = Some(kwh);
    }

    /// Record a newly applied current; a genuine change counts as a
    /// fluctuation, re-recording the same value only advances the integral
    pub fn record_ampere(&mut self, ampere: u32, at: DateTime<Utc>) {
        self.integrate_until(at);
        if ampere != self.ampere {
            self.fluctuations += 1;
            self.ampere = ampere;
        }
    }

    fn integrate_until(&mut self, at: DateTime<Utc>) {
        let elapsed = (at - self.last_change_at).num_milliseconds();
        if elapsed > 0 {
            self.amp_seconds += self.ampere as f64 * (elapsed as f64 / 1000.0);
            self.last_change_at = at;
        }
    }

    /// Close the session and produce its summary
    ///
    /// `import_now` is the daily import counter at shutdown; a counter that
    /// reset mid-session (midnight rollover) yields a negative delta which
    /// is clamped to zero.
    pub fn finish(
        &mut self,
        at: DateTime<Utc>,
        import_now: Option<f64>,
        energy_added_kwh: Option<f64>,
    ) -> SessionSummary {
        self.integrate_until(at);

        let duration_ms = (at - self.started_at).num_milliseconds().max(0) as u64;
        let duration_seconds = duration_ms as f64 / 1000.0;

        let grid_import_kwh = match (self.import_at_start, import_now) {
            (Some(start), Some(now)) => (now - start).max(0.0),
            _ => 0.0,
        };
        let total_energy_charged_kwh = energy_added_kwh.unwrap_or(0.0);
        let solar_energy_used_kwh = (total_energy_charged_kwh - grid_import_kwh).max(0.0);
        let average_charging_speed_amps = if duration_seconds > 0.0 {
            self.amp_seconds / duration_seconds
        } else {
            0.0
        };

        self.logger
            .debug(&format!("Closed charging session {}", self.id));

        SessionSummary {
            duration_ms,
            total_energy_charged_kwh,
            grid_import_kwh,
            solar_energy_used_kwh,
            average_charging_speed_amps,
            ampere_fluctuations: self.fluctuations,
            grid_import_cost: grid_import_kwh * self.cost_per_kwh,
        }
    }
}
