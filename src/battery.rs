//! Battery state cache
//!
//! The vehicle's state of charge changes slowly and querying it costs a
//! round trip to the car, so the cache refreshes at most once per cooldown
//! and only when charging activity (an ampere change) suggests movement.
//! Readers get a watch handle; `None` means the state was never fetched
//! and must be treated as unknown, not as an empty battery.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::events::ChargerEvent;
use crate::logging::{StructuredLogger, get_logger};
use crate::vehicle::VehicleClient;

/// Snapshot of the vehicle battery, read-only outside this module
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryState {
    /// State of charge in percent
    pub battery_level: f64,
    /// Configured charge limit in percent
    pub charge_limit: f64,
    pub queried_at: Instant,
}

pub struct BatteryCache {
    vehicle: Arc<dyn VehicleClient>,
    cooldown: Duration,
    tx: watch::Sender<Option<BatteryState>>,
    rx: watch::Receiver<Option<BatteryState>>,
    logger: StructuredLogger,
}

impl BatteryCache {
    pub fn new(vehicle: Arc<dyn VehicleClient>, cooldown: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            vehicle,
            cooldown,
            tx,
            rx,
            logger: get_logger("battery"),
        }
    }

    /// Read handle for the cached state; stays `None` until the first
    /// successful fetch. May be taken before the task is spawned.
    pub fn handle(&self) -> watch::Receiver<Option<BatteryState>> {
        self.rx.clone()
    }

    /// Start the cache task. The task ends when the event bus closes.
    pub fn spawn(self, events: broadcast::Receiver<ChargerEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(self, events: broadcast::Receiver<ChargerEvent>) {
        self.fetch().await;

        let mut stream = BroadcastStream::new(events);
        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    self.logger
                        .warn(&format!("Battery cache lagged, skipped {} events", missed));
                    continue;
                }
            };

            let ChargerEvent::AmpereChanged { previous, current } = event;
            let due = match *self.tx.borrow() {
                Some(state) => state.queried_at.elapsed() >= self.cooldown,
                None => true,
            };
            if due {
                self.logger.info(&format!(
                    "Refreshing battery state: ampere changed ({} -> {})",
                    previous, current
                ));
                self.fetch().await;
            }
        }
    }

    /// Fetch the charge state; on failure the previous value stays put
    async fn fetch(&self) {
        match self.vehicle.charge_state().await {
            Ok(state) => {
                self.tx.send_replace(Some(BatteryState {
                    battery_level: state.battery_level,
                    charge_limit: state.charge_limit,
                    queried_at: Instant::now(),
                }));
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Failed to refresh battery state: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::{VehicleChargeState, VehicleError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::{advance, sleep};

    /// Returns 50 + call-index percent until `fail_from`, then errors
    struct ScriptedVehicle {
        calls: AtomicU32,
        fail_from: u32,
    }

    impl ScriptedVehicle {
        fn new(fail_from: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_from,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VehicleClient for ScriptedVehicle {
        async fn start_charging(&self) -> std::result::Result<(), VehicleError> {
            Ok(())
        }

        async fn stop_charging(&self) -> std::result::Result<(), VehicleError> {
            Ok(())
        }

        async fn set_ampere(&self, _ampere: u32) -> std::result::Result<(), VehicleError> {
            Ok(())
        }

        async fn wake_up(&self) -> std::result::Result<(), VehicleError> {
            Ok(())
        }

        async fn charge_state(&self) -> std::result::Result<VehicleChargeState, VehicleError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_from {
                return Err(VehicleError::command_failed("scripted failure"));
            }
            Ok(VehicleChargeState {
                battery_level: 50.0 + n as f64,
                charge_limit: 80.0,
                charge_energy_added: 0.0,
            })
        }

        async fn refresh_access_token(&self) -> std::result::Result<(), VehicleError> {
            Ok(())
        }
    }

    const COOLDOWN: Duration = Duration::from_secs(600);

    fn ampere_changed() -> ChargerEvent {
        ChargerEvent::AmpereChanged {
            previous: 6,
            current: 9,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_populates_state() {
        let vehicle = ScriptedVehicle::new(u32::MAX);
        let events = crate::events::event_bus();
        let cache = BatteryCache::new(vehicle.clone(), COOLDOWN);
        let mut rx = cache.handle();
        let _handle = cache.spawn(events.subscribe());

        rx.changed().await.unwrap();
        let state = (*rx.borrow()).unwrap();
        assert!((state.battery_level - 50.0).abs() < f64::EPSILON);
        assert!((state.charge_limit - 80.0).abs() < f64::EPSILON);
        assert_eq!(vehicle.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_is_cooldown_gated() {
        let vehicle = ScriptedVehicle::new(u32::MAX);
        let events = crate::events::event_bus();
        let cache = BatteryCache::new(vehicle.clone(), COOLDOWN);
        let mut rx = cache.handle();
        let _handle = cache.spawn(events.subscribe());
        rx.changed().await.unwrap();
        assert_eq!(vehicle.calls(), 1);

        // 5 minutes in: inside the cooldown, the event is ignored
        advance(Duration::from_secs(300)).await;
        events.send(ampere_changed()).unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(vehicle.calls(), 1);

        // 11 minutes in: past the cooldown, the event triggers a refetch
        advance(Duration::from_secs(360)).await;
        events.send(ampere_changed()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(vehicle.calls(), 2);
        assert!(((*rx.borrow()).unwrap().battery_level - 51.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_retains_previous_value() {
        let vehicle = ScriptedVehicle::new(1);
        let events = crate::events::event_bus();
        let cache = BatteryCache::new(vehicle.clone(), COOLDOWN);
        let mut rx = cache.handle();
        let _handle = cache.spawn(events.subscribe());
        rx.changed().await.unwrap();

        advance(Duration::from_secs(660)).await;
        events.send(ampere_changed()).unwrap();
        sleep(Duration::from_millis(20)).await;

        // Second fetch failed; the stale state remains available
        assert_eq!(vehicle.calls(), 2);
        assert!(((*rx.borrow()).unwrap().battery_level - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_failure_leaves_state_unknown() {
        let vehicle = ScriptedVehicle::new(0);
        let events = crate::events::event_bus();
        let cache = BatteryCache::new(vehicle.clone(), COOLDOWN);
        let rx = cache.handle();
        let _handle = cache.spawn(events.subscribe());

        sleep(Duration::from_millis(20)).await;
        assert_eq!(vehicle.calls(), 1);
        assert!(rx.borrow().is_none());
    }
}
