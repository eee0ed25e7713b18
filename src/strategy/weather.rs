//! Weather-aware buffer strategy
//!
//! Wraps the aggressive excess formula with a dynamic safety buffer: small
//! when the forecast tracks expected clear-sky capacity (trustworthy sun),
//! large when clouds make the surplus flicker. With a departure deadline
//! configured, a charge-completion simulation shrinks the buffer further
//! when the schedule is tight.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use super::{ChargingSpeedStrategy, StrategyError, excess_to_ampere, grid_sample};
use crate::battery::BatteryState;
use crate::config::WeatherConfig;
use crate::forecast::{Forecast, SolarForecast};
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::TelemetrySource;

pub mod confidence;
pub mod simulation;
pub mod solar;

use confidence::{confidence_scaled_buffer, period_confidence};
use simulation::{SimulationParams, SimulationResult, simulate_charge};
use solar::{default_monthly_peak_factors, expected_capacity_kw, local_solar_hour};

/// Inputs that invalidate the cached simulation when they change
#[derive(Debug, Clone, PartialEq, Eq)]
struct SimulationKey {
    period_ends: Vec<DateTime<Utc>>,
    battery: Option<(u64, u64)>,
}

pub struct WeatherStrategy {
    telemetry: Arc<dyn TelemetrySource>,
    forecast: Arc<dyn SolarForecast>,
    battery: watch::Receiver<Option<BatteryState>>,
    config: WeatherConfig,
    monthly_factors: Vec<f64>,
    multiple_of: u32,
    max_ampere: u32,
    cached_simulation: Option<(SimulationKey, SimulationResult)>,
    logger: StructuredLogger,
}

impl WeatherStrategy {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        forecast: Arc<dyn SolarForecast>,
        battery: watch::Receiver<Option<BatteryState>>,
        config: WeatherConfig,
        multiple_of: u32,
        max_ampere: u32,
    ) -> Self {
        let monthly_factors = config
            .monthly_factors
            .clone()
            .unwrap_or_else(|| default_monthly_peak_factors(config.latitude));
        let logger = get_logger("strategy.weather");
        logger.info(&format!(
            "Weather-aware buffer initialized: peak {} kW at latitude {:.2}, monthly factors {:?}",
            config.peak_production_kw, config.latitude, monthly_factors
        ));
        Self {
            telemetry,
            forecast,
            battery,
            config,
            monthly_factors,
            multiple_of,
            max_ampere,
            cached_simulation: None,
            logger,
        }
    }

    fn cutoff_hour(&self) -> u32 {
        self.config
            .deadline_hour
            .unwrap_or(self.config.solar_cutoff_hour)
    }

    /// Re-run the completion simulation when forecast or battery changed
    fn simulation_for(
        &mut self,
        forecast: &Forecast,
        battery: Option<&BatteryState>,
        now: DateTime<Utc>,
    ) -> SimulationResult {
        let key = SimulationKey {
            period_ends: forecast.periods.iter().map(|p| p.period_end).collect(),
            battery: battery.map(|b| (b.battery_level.to_bits(), b.charge_limit.to_bits())),
        };
        if let Some((cached_key, cached)) = &self.cached_simulation
            && *cached_key == key
        {
            return *cached;
        }

        let params = SimulationParams {
            latitude: self.config.latitude,
            peak_kw: self.config.peak_production_kw,
            monthly_factors: &self.monthly_factors,
            min_buffer_watts: self.config.min_buffer_watts,
            buffer_multiplier_max: self.config.buffer_multiplier_max,
            battery_capacity_kwh: self.config.battery_capacity_kwh,
            cutoff_hour: self.cutoff_hour(),
        };
        let result = simulate_charge(&params, &forecast.periods, battery, now);
        if !result.can_complete && result.shortfall_kwh > 0.0 {
            self.logger.warn(&format!(
                "Forecast shows {:.1} kWh shortfall by {}:00 due to cloud cover. Charging conservatively.",
                result.shortfall_kwh,
                self.cutoff_hour()
            ));
        }
        self.cached_simulation = Some((key, result));
        result
    }

    fn buffer_watts(
        &self,
        forecast: &Forecast,
        battery: Option<&BatteryState>,
        simulation: &SimulationResult,
        now: DateTime<Utc>,
    ) -> f64 {
        let current_period = forecast
            .upcoming(now)
            .find(|p| p.period_end - now < ChronoDuration::minutes(30));
        let Some(period) = current_period else {
            return self.config.min_buffer_watts;
        };

        let hour = local_solar_hour(period.period_end);
        let expected = expected_capacity_kw(
            period.period_end.date_naive(),
            hour,
            self.config.latitude,
            self.config.peak_production_kw,
            &self.monthly_factors,
        );
        let confidence = period_confidence(period.pv_estimate, expected);
        let weather_buffer = confidence_scaled_buffer(
            self.config.min_buffer_watts,
            self.config.buffer_multiplier_max,
            confidence,
        );

        // Urgency modulation only applies with a known deadline and battery
        let buffer = if self.config.deadline_hour.is_some() && battery.is_some() {
            weather_buffer * (1.0 - simulation.utilization_ratio * 0.5)
        } else {
            weather_buffer
        };
        buffer.max(self.config.min_buffer_watts)
    }
}

#[async_trait]
impl ChargingSpeedStrategy for WeatherStrategy {
    async fn determine_charging_speed(
        &mut self,
        current_ampere: u32,
    ) -> std::result::Result<u32, StrategyError> {
        let now = Utc::now();

        // A missing forecast degrades to the static minimum buffer
        let forecast = match self.forecast.forecast().await {
            Ok(forecast) => forecast,
            Err(e) => {
                self.logger
                    .debug(&format!("No forecast available: {}", e));
                Forecast::default()
            }
        };
        let battery = self.battery.borrow().clone();

        let simulation = self.simulation_for(&forecast, battery.as_ref(), now);
        let buffer_w = self.buffer_watts(&forecast, battery.as_ref(), &simulation, now);

        let sample = grid_sample(self.telemetry.as_ref()).await?;
        let excess_w = sample.net_export() - buffer_w + current_ampere as f64 * sample.voltage;
        self.logger.debug(&format!(
            "Buffer {:.0} W, excess {:.0} W (net export {:.0} W)",
            buffer_w,
            excess_w,
            sample.net_export()
        ));

        Ok(excess_to_ampere(
            excess_w,
            sample.voltage,
            self.multiple_of,
            self.max_ampere,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{ForecastError, ForecastPeriod};
    use crate::telemetry::{Field, TelemetryError, TelemetrySnapshot};
    use std::sync::Mutex;
    use tokio::time::Instant;

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

    struct ScriptedForecast {
        result: Mutex<Option<Forecast>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl SolarForecast for ScriptedForecast {
        async fn forecast(&self) -> std::result::Result<Forecast, ForecastError> {
            *self.calls.lock().unwrap() += 1;
            self.result
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ForecastError::not_available("scripted outage"))
        }
    }

    fn trusted_period(now: DateTime<Utc>) -> ForecastPeriod {
        // Well above any expected capacity, so confidence saturates at 1
        ForecastPeriod {
            pv_estimate: 50.0,
            pv_estimate10: 40.0,
            pv_estimate90: 60.0,
            period_end: now + ChronoDuration::minutes(15),
            period: "PT30M".to_string(),
        }
    }

    fn config() -> WeatherConfig {
        WeatherConfig {
            latitude: 52.0,
            peak_production_kw: 8.0,
            monthly_factors: Some(vec![1.0; 12]),
            min_buffer_watts: 200.0,
            buffer_multiplier_max: 3.0,
            battery_capacity_kwh: 75.0,
            solar_cutoff_hour: 18,
            deadline_hour: None,
        }
    }

    fn strategy_with(
        forecast: Arc<ScriptedForecast>,
        battery: Option<BatteryState>,
        export_w: f64,
        config: WeatherConfig,
    ) -> (WeatherStrategy, watch::Sender<Option<BatteryState>>) {
        let (tx, rx) = watch::channel(battery);
        let strategy = WeatherStrategy::new(
            Arc::new(FixedTelemetry {
                voltage: 230.0,
                export_w,
                import_w: 0.0,
            }),
            forecast,
            rx,
            config,
            3,
            32,
        );
        (strategy, tx)
    }

    fn no_forecast() -> Arc<ScriptedForecast> {
        Arc::new(ScriptedForecast {
            result: Mutex::new(None),
            calls: Mutex::new(0),
        })
    }

    fn noon() -> DateTime<Utc> {
        "2026-06-15T12:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn test_forecast_outage_degrades_to_minimum_buffer() {
        // 2500 W export, 200 W floor buffer: 2300 W is exactly 10 A -> 9
        let (mut strategy, _tx) = strategy_with(no_forecast(), None, 2500.0, config());
        assert_eq!(strategy.determine_charging_speed(0).await.unwrap(), 9);
    }

    #[test]
    fn test_trusted_forecast_keeps_the_floor_buffer() {
        let now = noon();
        let forecast = Forecast {
            periods: vec![trusted_period(now)],
        };
        let (mut strategy, _tx) = strategy_with(no_forecast(), None, 2500.0, config());
        let simulation = strategy.simulation_for(&forecast, None, now);
        let buffer = strategy.buffer_watts(&forecast, None, &simulation, now);
        assert!((buffer - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_untrusted_forecast_inflates_the_buffer() {
        let now = noon();
        // Near-zero estimate at midday: confidence collapses, buffer
        // grows to min * multiplier
        let forecast = Forecast {
            periods: vec![ForecastPeriod {
                pv_estimate: 0.0,
                pv_estimate10: 0.0,
                pv_estimate90: 0.1,
                period_end: now + ChronoDuration::minutes(15),
                period: "PT30M".to_string(),
            }],
        };
        let (mut strategy, _tx) = strategy_with(no_forecast(), None, 2500.0, config());
        let simulation = strategy.simulation_for(&forecast, None, now);
        let buffer = strategy.buffer_watts(&forecast, None, &simulation, now);
        assert!((buffer - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_deadline_pressure_shrinks_the_buffer() {
        let now = noon();
        let mut deadline_config = config();
        deadline_config.deadline_hour = Some(18);
        let battery = BatteryState {
            battery_level: 50.0,
            charge_limit: 80.0,
            queried_at: Instant::now(),
        };
        // Untrusted period (buffer would be 600 W) under full utilization
        let forecast = Forecast {
            periods: vec![ForecastPeriod {
                pv_estimate: 0.0,
                pv_estimate10: 0.0,
                pv_estimate90: 0.1,
                period_end: now + ChronoDuration::minutes(15),
                period: "PT30M".to_string(),
            }],
        };
        let (strategy, _tx) = strategy_with(no_forecast(), None, 2500.0, deadline_config);
        let simulation = SimulationResult {
            can_complete: true,
            usable_slots: 4,
            total_slots: 4,
            utilization_ratio: 1.0,
            shortfall_kwh: 0.0,
        };
        let buffer = strategy.buffer_watts(&forecast, Some(&battery), &simulation, now);
        assert!((buffer - 300.0).abs() < 1e-9);

        // Floor still wins when the scaled value drops below it
        let trusted = Forecast {
            periods: vec![trusted_period(now)],
        };
        let buffer = strategy.buffer_watts(&trusted, Some(&battery), &simulation, now);
        assert!((buffer - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_simulation_is_cached_per_forecast_and_battery() {
        let now = Utc::now();
        let forecast = Arc::new(ScriptedForecast {
            result: Mutex::new(Some(Forecast {
                periods: vec![trusted_period(now)],
            })),
            calls: Mutex::new(0),
        });
        let battery = BatteryState {
            battery_level: 50.0,
            charge_limit: 80.0,
            queried_at: Instant::now(),
        };
        let (mut strategy, _tx) =
            strategy_with(forecast.clone(), Some(battery), 2500.0, config());

        strategy.determine_charging_speed(0).await.unwrap();
        let first = strategy.cached_simulation.clone();
        strategy.determine_charging_speed(0).await.unwrap();
        let second = strategy.cached_simulation.clone();

        // Same forecast and battery: the cached entry is reused as-is
        assert_eq!(
            first.as_ref().map(|(k, _)| k.clone()),
            second.as_ref().map(|(k, _)| k.clone())
        );
        assert_eq!(*forecast.calls.lock().unwrap(), 2);
    }
}
