use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use helion::error::HelionError;
use helion::telemetry::{Field, TelemetryError, TelemetrySnapshot, TelemetrySource};
use helion::watchdog::ProductionWatchdog;

/// Serves scripted (production, import) samples in order, repeating the
/// last one; an entry of `None` fails the query.
struct ScriptedTelemetry {
    samples: Mutex<Vec<Option<(f64, f64)>>>,
    calls: AtomicU32,
}

impl ScriptedTelemetry {
    fn new(samples: Vec<Option<(f64, f64)>>) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(samples),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TelemetrySource for ScriptedTelemetry {
    async fn query_latest_values(
        &self,
        _fields: &[Field],
    ) -> Result<TelemetrySnapshot, TelemetryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut samples = self.samples.lock().unwrap();
        let sample = if samples.len() > 1 {
            samples.remove(0)
        } else {
            samples[0]
        };
        match sample {
            Some((production, import)) => {
                let mut snapshot = TelemetrySnapshot::new();
                snapshot.insert(Field::CurrentProduction, production);
                snapshot.insert(Field::ImportFromGrid, import);
                Ok(snapshot)
            }
            None => Err(TelemetryError::source_unavailable("connection refused")),
        }
    }

    async fn lowest_value_in_window(
        &self,
        _field: Field,
        _minutes: u32,
    ) -> Result<f64, TelemetryError> {
        Err(TelemetryError::no_data("not scripted"))
    }
}

#[tokio::test(start_paused = true)]
async fn timer_wins_when_supply_holds() {
    let telemetry = ScriptedTelemetry::new(vec![Some((2_000.0, 0.0))]);
    let watchdog = ProductionWatchdog::new(telemetry, 300.0, Duration::from_secs(3));

    watchdog
        .settle(2_000.0, Duration::from_secs(20))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn grid_import_aborts_the_settle_window() {
    // Production barely sags but the house starts importing
    let telemetry = ScriptedTelemetry::new(vec![Some((1_800.0, 120.0))]);
    let watchdog = ProductionWatchdog::new(telemetry, 300.0, Duration::from_secs(3));

    let err = watchdog
        .settle(2_000.0, Duration::from_secs(20))
        .await
        .unwrap_err();
    match err {
        HelionError::ProductionDrop {
            baseline_w,
            production_w,
            import_w,
        } => {
            assert!((baseline_w - 2_000.0).abs() < f64::EPSILON);
            assert!((production_w - 1_800.0).abs() < f64::EPSILON);
            assert!((import_w - 120.0).abs() < f64::EPSILON);
        }
        other => panic!("expected ProductionDrop, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn production_below_baseline_minus_buffer_aborts() {
    let telemetry = ScriptedTelemetry::new(vec![Some((1_500.0, 0.0))]);
    let watchdog = ProductionWatchdog::new(telemetry, 300.0, Duration::from_secs(3));

    let err = watchdog
        .settle(2_000.0, Duration::from_secs(20))
        .await
        .unwrap_err();
    assert!(matches!(err, HelionError::ProductionDrop { .. }));
}

#[tokio::test(start_paused = true)]
async fn sag_within_buffer_is_tolerated() {
    // 1 750 W is above baseline minus buffer (1 700 W), no import
    let telemetry = ScriptedTelemetry::new(vec![Some((1_750.0, 0.0))]);
    let watchdog = ProductionWatchdog::new(telemetry, 300.0, Duration::from_secs(3));

    watchdog
        .settle(2_000.0, Duration::from_secs(10))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn drop_on_a_later_poll_is_still_caught() {
    let telemetry = ScriptedTelemetry::new(vec![
        Some((2_100.0, 0.0)),
        Some((2_050.0, 0.0)),
        Some((900.0, 450.0)),
    ]);
    let watchdog = ProductionWatchdog::new(telemetry, 300.0, Duration::from_secs(3));

    let err = watchdog
        .settle(2_000.0, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, HelionError::ProductionDrop { import_w, .. } if import_w > 0.0));
}

#[tokio::test(start_paused = true)]
async fn telemetry_failure_in_watch_arm_propagates() {
    let telemetry = ScriptedTelemetry::new(vec![None]);
    let watchdog = ProductionWatchdog::new(telemetry, 300.0, Duration::from_secs(3));

    let err = watchdog
        .settle(2_000.0, Duration::from_secs(20))
        .await
        .unwrap_err();
    assert!(matches!(err, HelionError::Telemetry(_)));
}

#[tokio::test(start_paused = true)]
async fn settle_shorter_than_poll_interval_never_queries() {
    // The only scripted sample would trip the watchdog if it were read
    let telemetry = ScriptedTelemetry::new(vec![Some((0.0, 900.0))]);
    let watchdog =
        ProductionWatchdog::new(telemetry.clone(), 300.0, Duration::from_secs(5));

    watchdog
        .settle(2_000.0, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(telemetry.calls.load(Ordering::SeqCst), 0);
}
