//! Charger event plumbing
//!
//! Components that want to react to charging decisions without being wired
//! into the control loop subscribe to a broadcast bus ([`ChargerEvent`]) or
//! implement the [`EventSink`] callback trait the loop notifies directly.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::logging::{StructuredLogger, get_logger};
use crate::session::SessionSummary;

/// Broadcast capacity; subscribers that lag simply miss old events
const EVENT_BUS_CAPACITY: usize = 64;

/// Events published by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChargerEvent {
    /// The applied charging current changed
    AmpereChanged { previous: u32, current: u32 },
}

/// Create the charger event bus
pub fn event_bus() -> broadcast::Sender<ChargerEvent> {
    let (tx, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
    tx
}

/// Observer callbacks invoked synchronously by the control loop
pub trait EventSink: Send + Sync {
    /// A new current is about to be applied
    fn on_set_ampere(&self, ampere: u32);

    /// The strategy confirmed the present current
    fn on_no_ampere_change(&self, ampere: u32);

    /// The session ended; always called exactly once per session
    fn on_session_end(&self, summary: &SessionSummary);
}

/// Event sink that writes through the structured logger
pub struct LogEventSink {
    logger: StructuredLogger,
    currency_symbol: String,
}

impl LogEventSink {
    pub fn new(currency_symbol: impl Into<String>) -> Self {
        Self {
            logger: get_logger("events"),
            currency_symbol: currency_symbol.into(),
        }
    }
}

impl EventSink for LogEventSink {
    fn on_set_ampere(&self, ampere: u32) {
        self.logger.info(&format!("Setting charging speed to {} A", ampere));
    }

    fn on_no_ampere_change(&self, ampere: u32) {
        self.logger
            .debug(&format!("Charging speed unchanged at {} A", ampere));
    }

    fn on_session_end(&self, summary: &SessionSummary) {
        self.logger.info(&format!(
            "Session summary: duration {}, energy added {:.2} kWh, grid import {:.2} kWh, \
             solar used {:.2} kWh, average {:.1} A, {} fluctuations, import cost {}{:.2}",
            format_duration_ms(summary.duration_ms),
            summary.total_energy_charged_kwh,
            summary.grid_import_kwh,
            summary.solar_energy_used_kwh,
            summary.average_charging_speed_amps,
            summary.ampere_fluctuations,
            self.currency_symbol,
            summary.grid_import_cost,
        ));
    }
}

/// Render a millisecond duration as "1h 02m 03s"
pub fn format_duration_ms(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
