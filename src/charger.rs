//! Charging control loop
//!
//! [`ChargeController`] drives one charging session end to end: it asks the
//! configured strategy for a target current, pushes the difference to the
//! vehicle, waits out the settle window (racing the production-drop
//! watchdog on increases) and repeats until a shutdown signal or a fatal
//! error ends the session. All charge state has exactly one writer, the
//! loop itself; companion tasks (token refresh, battery cache, runtime cap)
//! communicate through channels only.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval, sleep};

use crate::battery::BatteryCache;
use crate::config::{ChargingConfig, Config, TimingConfig};
use crate::error::{HelionError, Result};
use crate::events::{ChargerEvent, EventSink};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::session::{SessionStatus, SessionTracker};
use crate::strategy::ChargingSpeedStrategy;
use crate::telemetry::{Field, TelemetrySource, require_field};
use crate::vehicle::{VehicleClient, VehicleError};
use crate::watchdog::ProductionWatchdog;

/// How often the vehicle access token is refreshed while a session runs
const TOKEN_REFRESH_PERIOD: Duration = Duration::from_secs(2 * 60 * 60);

/// Attempts to stop the charge during shutdown before giving up
const STOP_CHARGING_ATTEMPTS: u32 = 3;

/// Slack between the measured load current and the applied current before
/// the advisory consistency check complains
const CONSISTENCY_TOLERANCE_AMPS: f64 = 1.0;

/// What the loop believes it last told the vehicle
///
/// `ampere` is 0 whenever `running` is false; every path that clears
/// `running` also zeroes `ampere`.
#[derive(Debug, Default)]
struct ChargeState {
    running: bool,
    ampere: u32,
    last_command_at: Option<Instant>,
}

pub struct ChargeController {
    telemetry: Arc<dyn TelemetrySource>,
    vehicle: Arc<dyn VehicleClient>,
    strategy: Box<dyn ChargingSpeedStrategy>,
    sink: Arc<dyn EventSink>,
    events: broadcast::Sender<ChargerEvent>,
    battery_cache: Option<BatteryCache>,
    watchdog: ProductionWatchdog,
    timing: TimingConfig,
    charging: ChargingConfig,
    state: ChargeState,
    session: SessionTracker,
    status: watch::Sender<SessionStatus>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    logger: StructuredLogger,
}

impl ChargeController {
    pub fn new(
        config: &Config,
        telemetry: Arc<dyn TelemetrySource>,
        vehicle: Arc<dyn VehicleClient>,
        battery_cache: BatteryCache,
        strategy: Box<dyn ChargingSpeedStrategy>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let watchdog = ProductionWatchdog::new(
            Arc::clone(&telemetry),
            config.charging.buffer_watts,
            config.charging.watchdog_poll_interval(),
        );
        let session = SessionTracker::new(config.charging.grid_import_cost_per_kwh);
        let logger = get_logger_with_context(
            LogContext::new("charger").with_session_id(session.id().to_string()),
        );
        let (status, _) = watch::channel(SessionStatus::Pending);
        let (shutdown, _) = broadcast::channel(4);

        Self {
            telemetry,
            vehicle,
            strategy,
            sink,
            events: crate::events::event_bus(),
            battery_cache: Some(battery_cache),
            watchdog,
            timing: config.timing.clone(),
            charging: config.charging.clone(),
            state: ChargeState::default(),
            session,
            status,
            shutdown,
            tasks: Vec::new(),
            logger,
        }
    }

    /// Observe the session lifecycle
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Handle for requesting a graceful shutdown from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn applied_ampere(&self) -> u32 {
        self.state.ampere
    }

    pub fn fluctuations(&self) -> u32 {
        self.session.fluctuations()
    }

    /// Run a charging session until shutdown or a fatal error.
    ///
    /// Fails fast when the controller was started before; a controller
    /// drives exactly one session. On any exit path [`stop`](Self::stop)
    /// runs before this returns, so the session summary is always emitted.
    pub async fn start(&mut self) -> Result<()> {
        let status = *self.status.borrow();
        if status != SessionStatus::Pending {
            return Err(HelionError::invalid_state(format!(
                "Session in {:?} state cannot be started again",
                status
            )));
        }
        self.status.send_replace(SessionStatus::Running);
        self.logger.info("Charging session starting");

        let result = self.run_session().await;
        if let Err(e) = &result {
            self.logger.error(&format!("Session failed: {}", e));
        }
        self.stop().await;
        result
    }

    async fn run_session(&mut self) -> Result<()> {
        self.vehicle.refresh_access_token().await?;

        let snapshot = self
            .telemetry
            .query_latest_values(&[Field::DailyImport])
            .await?;
        let import = require_field(&snapshot, Field::DailyImport)?;
        self.session.set_import_at_start(import);

        self.spawn_background_tasks();

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    self.logger.info("Shutdown requested, leaving the control loop");
                    return Ok(());
                }
                result = self.sync_with_retries() => result?,
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    self.logger.info("Shutdown requested, leaving the control loop");
                    return Ok(());
                }
                _ = sleep(self.timing.sync_interval()) => {}
            }

            self.check_charging_consistency().await?;
        }
    }

    fn spawn_background_tasks(&mut self) {
        let vehicle = Arc::clone(&self.vehicle);
        let logger = self.logger.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(TOKEN_REFRESH_PERIOD);
            // The first tick fires immediately; the session start already
            // refreshed, so skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = vehicle.refresh_access_token().await {
                    logger.warn(&format!("Scheduled token refresh failed: {}", e));
                }
            }
        }));

        if let Some(cache) = self.battery_cache.take() {
            self.tasks.push(cache.spawn(self.events.subscribe()));
        }

        if let Some(limit) = self.timing.max_runtime() {
            let shutdown = self.shutdown.clone();
            let logger = self.logger.clone();
            self.tasks.push(tokio::spawn(async move {
                sleep(limit).await;
                logger.info(&format!(
                    "Maximum session runtime of {} minutes reached, shutting down",
                    limit.as_secs() / 60
                ));
                let _ = shutdown.send(());
            }));
        }
    }

    /// One control iteration under the retry policy: a sleeping vehicle is
    /// woken a bounded number of times, a production drop restarts the
    /// iteration immediately a bounded number of times, everything else is
    /// fatal to the session.
    async fn sync_with_retries(&mut self) -> Result<()> {
        let mut wakes = 0u32;
        let mut drops = 0u32;
        loop {
            let err = match self.sync_once().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if err.is_vehicle_asleep() {
                if wakes >= self.charging.wake_attempts {
                    return Err(HelionError::VehicleNotWakingUp { attempts: wakes });
                }
                wakes += 1;
                self.logger.warn(&format!(
                    "Vehicle is asleep, waking it (attempt {}/{})",
                    wakes, self.charging.wake_attempts
                ));
                sleep(self.timing.vehicle_awakening_time()).await;
                self.vehicle.wake_up().await?;
                self.state.last_command_at = Some(Instant::now());
                continue;
            }

            if let HelionError::ProductionDrop {
                baseline_w,
                production_w,
                ..
            } = err
            {
                if drops >= self.charging.production_drop_retries {
                    return Err(HelionError::ProductionUnstable { retries: drops });
                }
                drops += 1;
                self.logger.warn(&format!(
                    "Production fell from {:.0} W to {:.0} W while settling, retrying ({}/{})",
                    baseline_w, production_w, drops, self.charging.production_drop_retries
                ));
                continue;
            }

            return Err(err);
        }
    }

    async fn sync_once(&mut self) -> Result<()> {
        let desired = self
            .strategy
            .determine_charging_speed(self.state.ampere)
            .await?;
        let target = desired.min(self.charging.max_ampere);
        self.sync_ampere(target).await
    }

    /// Bring the vehicle to `target` amperes.
    ///
    /// Leaves `ampere == 0` exactly when `running == false`; a target below
    /// the minimum stops the charge, anything else starts it if needed and
    /// applies the difference.
    async fn sync_ampere(&mut self, target: u32) -> Result<()> {
        let snapshot = self
            .telemetry
            .query_latest_values(&[Field::CurrentProduction])
            .await?;
        let baseline_w = require_field(&snapshot, Field::CurrentProduction)?;

        if target < self.charging.min_ampere {
            if self.state.running {
                self.halt_charging().await?;
            }
            return Ok(());
        }

        let started_now = !self.state.running;
        if started_now {
            self.begin_charging().await?;
        }

        let previous = self.state.ampere;
        if target == previous {
            self.sink.on_no_ampere_change(target);
            return Ok(());
        }

        self.sink.on_set_ampere(target);
        self.wake_if_inactive().await?;
        self.vehicle.set_ampere(target).await?;
        self.state.ampere = target;
        self.state.last_command_at = Some(Instant::now());
        self.session.record_ampere(target, Utc::now());
        let _ = self.events.send(ChargerEvent::AmpereChanged {
            previous,
            current: target,
        });

        let mut wait = self.timing.wait_per_ampere() * target.abs_diff(previous);
        if target > previous {
            if started_now {
                wait += self.timing.extra_wait_on_charge_start();
            }
            // A supply drop while ramping up needs to cut the settle short;
            // while ramping down it is already being handled
            self.watchdog.settle(baseline_w, wait).await?;
        } else {
            sleep(wait).await;
        }
        Ok(())
    }

    async fn begin_charging(&mut self) -> Result<()> {
        self.wake_if_inactive().await?;
        self.logger.info("Starting the charge");
        self.vehicle.start_charging().await?;
        self.state.running = true;
        self.state.last_command_at = Some(Instant::now());
        Ok(())
    }

    async fn halt_charging(&mut self) -> Result<()> {
        self.wake_if_inactive().await?;
        self.logger.info(&format!(
            "Target below {} A, stopping the charge",
            self.charging.min_ampere
        ));
        self.vehicle.stop_charging().await?;
        self.state.running = false;
        self.state.ampere = 0;
        self.state.last_command_at = Some(Instant::now());
        self.session.record_ampere(0, Utc::now());
        sleep(self.timing.extra_wait_on_charge_stop()).await;
        Ok(())
    }

    /// Wake the vehicle when the last command is long enough ago that it
    /// has likely fallen asleep. A session without any command history does
    /// not wake proactively; the asleep retry path covers that case.
    async fn wake_if_inactive(&mut self) -> Result<()> {
        let Some(last) = self.state.last_command_at else {
            return Ok(());
        };
        if last.elapsed() <= self.timing.inactivity_time() {
            return Ok(());
        }
        self.logger.info(&format!(
            "No command for over {} s, waking the vehicle first",
            self.timing.inactivity_time().as_secs()
        ));
        self.vehicle.wake_up().await?;
        self.state.last_command_at = Some(Instant::now());
        Ok(())
    }

    /// Advisory check that the measured household load is consistent with
    /// the applied current. Telemetry lag makes this unreliable, so a
    /// mismatch only logs; a telemetry failure still propagates.
    async fn check_charging_consistency(&self) -> Result<()> {
        if !self.state.running {
            return Ok(());
        }
        let snapshot = self
            .telemetry
            .query_latest_values(&[Field::Voltage, Field::CurrentLoad])
            .await?;
        let voltage = require_field(&snapshot, Field::Voltage)?;
        let load = require_field(&snapshot, Field::CurrentLoad)?;
        if voltage <= 0.0 {
            return Ok(());
        }

        let measured_amps = load / voltage;
        if measured_amps + CONSISTENCY_TOLERANCE_AMPS < self.state.ampere as f64 {
            self.logger.warn(&format!(
                "Measured load {:.1} A is below the applied {} A; telemetry may be lagging",
                measured_amps, self.state.ampere
            ));
        }
        Ok(())
    }

    /// End the session: cancel companion tasks, stop the charge if one is
    /// running and emit the summary. Idempotent; secondary failures during
    /// shutdown are logged and swallowed.
    pub async fn stop(&mut self) {
        if *self.status.borrow() == SessionStatus::Stopped {
            return;
        }
        self.status.send_replace(SessionStatus::Stopped);
        self.logger.info("Stopping charging session");

        for task in self.tasks.drain(..) {
            task.abort();
        }

        if self.state.running {
            self.stop_charging_on_shutdown().await;
        }

        self.emit_summary().await;
    }

    /// Stop the charge with a bounded number of retries, gated only on the
    /// vehicle being asleep; every other failure is ignored at shutdown
    async fn stop_charging_on_shutdown(&mut self) {
        for attempt in 1..=STOP_CHARGING_ATTEMPTS {
            match self.vehicle.stop_charging().await {
                Ok(()) => {
                    self.state.running = false;
                    self.state.ampere = 0;
                    self.state.last_command_at = Some(Instant::now());
                    self.session.record_ampere(0, Utc::now());
                    return;
                }
                Err(VehicleError::Asleep) if attempt < STOP_CHARGING_ATTEMPTS => {
                    self.logger.warn(&format!(
                        "Vehicle asleep while stopping the charge (attempt {}/{})",
                        attempt, STOP_CHARGING_ATTEMPTS
                    ));
                    sleep(self.timing.vehicle_awakening_time()).await;
                    if let Err(e) = self.vehicle.wake_up().await {
                        self.logger
                            .warn(&format!("Wake-up during shutdown failed: {}", e));
                        return;
                    }
                }
                Err(e) => {
                    self.logger
                        .warn(&format!("Failed to stop charging during shutdown: {}", e));
                    return;
                }
            }
        }
        self.logger.warn("Giving up on stopping the charge; vehicle stayed asleep");
    }

    async fn emit_summary(&mut self) {
        let import_now = match self
            .telemetry
            .query_latest_values(&[Field::DailyImport])
            .await
        {
            Ok(snapshot) => snapshot.get(&Field::DailyImport).copied(),
            Err(e) => {
                self.logger
                    .debug(&format!("No grid import reading for the summary: {}", e));
                None
            }
        };
        let energy_added = match self.vehicle.charge_state().await {
            Ok(state) => Some(state.charge_energy_added),
            Err(e) => {
                self.logger
                    .debug(&format!("No vehicle energy reading for the summary: {}", e));
                None
            }
        };

        let summary = self.session.finish(Utc::now(), import_now, energy_added);
        self.sink.on_session_end(&summary);
    }
}
