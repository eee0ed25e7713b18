//! Charge completion simulation
//!
//! Walks the forecast horizon and estimates whether the remaining battery
//! need can be covered by surplus solar before the cutoff hour. The result
//! feeds the urgency modulation of the safety buffer: a comfortable margin
//! keeps the buffer conservative, a tight schedule shrinks it.

use chrono::{DateTime, Utc};

use super::confidence::{confidence_scaled_buffer, period_confidence};
use super::solar::{expected_capacity_kw, local_solar_hour};
use crate::battery::BatteryState;
use crate::forecast::ForecastPeriod;

/// Below roughly 3 A at 230 V the charger will not sustain a charge
pub const MIN_CHARGING_THRESHOLD_W: f64 = 690.0;

/// Remaining need under this is counted as complete (rounding headroom)
pub const COMPLETION_TOLERANCE_KWH: f64 = 0.3;

#[derive(Debug, Clone, Copy)]
pub struct SimulationParams<'a> {
    pub latitude: f64,
    pub peak_kw: f64,
    pub monthly_factors: &'a [f64],
    pub min_buffer_watts: f64,
    pub buffer_multiplier_max: f64,
    pub battery_capacity_kwh: f64,
    /// Fractional-hour cutoff: departure deadline if set, else end of
    /// useful solar
    pub cutoff_hour: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationResult {
    pub can_complete: bool,
    pub usable_slots: u32,
    pub total_slots: u32,
    pub utilization_ratio: f64,
    pub shortfall_kwh: f64,
}

impl SimulationResult {
    fn unknown() -> Self {
        Self {
            can_complete: false,
            usable_slots: 0,
            total_slots: 0,
            utilization_ratio: 0.0,
            shortfall_kwh: 0.0,
        }
    }
}

pub fn simulate_charge(
    params: &SimulationParams<'_>,
    periods: &[ForecastPeriod],
    battery: Option<&BatteryState>,
    now: DateTime<Utc>,
) -> SimulationResult {
    let Some(battery) = battery else {
        // Unknown battery state: report nothing rather than guessing
        return SimulationResult::unknown();
    };

    let mut remaining_kwh =
        (battery.charge_limit - battery.battery_level) / 100.0 * params.battery_capacity_kwh;
    let mut usable_slots = 0u32;
    let mut total_slots = 0u32;

    for period in periods {
        if period.period_end < now {
            continue;
        }
        let hour = local_solar_hour(period.period_end);
        if hour >= params.cutoff_hour as f64 {
            continue;
        }
        total_slots += 1;

        let expected = expected_capacity_kw(
            period.period_end.date_naive(),
            hour,
            params.latitude,
            params.peak_kw,
            params.monthly_factors,
        );
        let confidence = period_confidence(period.pv_estimate, expected);
        let buffer_w = confidence_scaled_buffer(
            params.min_buffer_watts,
            params.buffer_multiplier_max,
            confidence,
        );
        let available_w = period.pv_estimate * 1000.0 - buffer_w;

        if available_w > MIN_CHARGING_THRESHOLD_W && remaining_kwh > 0.0 {
            // Half-hour slot, discounted by how much we trust the forecast
            remaining_kwh -= available_w / 1000.0 * 0.5 * confidence;
            usable_slots += 1;
            if remaining_kwh <= 0.0 {
                break;
            }
        }
    }

    let can_complete = remaining_kwh <= COMPLETION_TOLERANCE_KWH;
    SimulationResult {
        can_complete,
        usable_slots,
        total_slots,
        utilization_ratio: if total_slots > 0 {
            usable_slots as f64 / total_slots as f64
        } else {
            0.0
        },
        shortfall_kwh: if can_complete { 0.0 } else { remaining_kwh },
    }
}
