use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use helion::battery::{BatteryCache, BatteryState};
use helion::charger::ChargeController;
use helion::config::{Config, StrategyKind, TelemetrySourceKind};
use helion::events::LogEventSink;
use helion::forecast::{SolarForecast, SolcastSource};
use helion::logging::init_logging;
use helion::strategy::{
    AggressiveStrategy, ChargingSpeedStrategy, ConservativeStrategy, FeedInStrategy, FixedStrategy,
    SmoothingStrategy, WeatherStrategy,
};
use helion::telemetry::{AlphaEssSource, SungatherSource, SungrowSource, TelemetrySource};
use helion::vehicle::{DryRunVehicle, TeslaControlClient, VehicleClient};

#[derive(Parser, Debug)]
#[command(author, version, about = "Charge an EV from rooftop solar surplus")]
struct Args {
    /// Path to the YAML configuration file
    #[clap(long, env = "HELION_CONFIG")]
    config: Option<PathBuf>,

    /// Charging speed strategy, overriding the configured default
    #[clap(long, env = "HELION_STRATEGY")]
    strategy: Option<StrategyKind>,

    /// Telemetry source, overriding the configured default
    #[clap(long, env = "HELION_TELEMETRY")]
    telemetry: Option<TelemetrySourceKind>,

    /// Hold back ramp-ups until readings stay high (overrides the config)
    #[clap(long, env = "HELION_SMOOTHING", value_parser = ["on", "off"])]
    smoothing: Option<String>,

    /// Log vehicle commands instead of issuing them
    #[clap(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?,
        None => Config::load()?,
    };
    config.apply_env_overrides();

    init_logging(&config.logging)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let strategy_kind = args.strategy.unwrap_or(config.strategy.default);
    let source_kind = args.telemetry.unwrap_or(config.telemetry.source);
    let smoothing = match args.smoothing.as_deref() {
        Some("on") => true,
        Some("off") => false,
        // clap's value_parser only admits "on" and "off"
        Some(_) => unreachable!(),
        None => config.strategy.smoothing.enabled,
    };

    info!(
        "Helion {} starting: {:?} strategy on {:?} telemetry{}",
        env!("APP_VERSION"),
        strategy_kind,
        source_kind,
        if args.dry_run { " (dry run)" } else { "" }
    );

    let telemetry = build_telemetry(&config, source_kind)?;
    let vehicle = build_vehicle(&config, args.dry_run)?;
    let battery_cache = BatteryCache::new(
        Arc::clone(&vehicle),
        config.charging.battery_refresh_cooldown(),
    );
    let strategy = build_strategy(
        &config,
        strategy_kind,
        smoothing,
        &telemetry,
        battery_cache.handle(),
    )?;
    let sink = Arc::new(LogEventSink::new(config.charging.currency_symbol.clone()));

    let mut controller =
        ChargeController::new(&config, telemetry, vehicle, battery_cache, strategy, sink);

    let shutdown = controller.shutdown_handle();
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Termination signal received, stopping the session");
        let _ = shutdown.send(());
    });

    match controller.start().await {
        Ok(()) => {
            info!("Session complete");
            Ok(())
        }
        Err(e) => {
            error!("Session failed: {}", e);
            Err(anyhow::anyhow!("Session error: {}", e))
        }
    }
}

async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn build_telemetry(config: &Config, kind: TelemetrySourceKind) -> Result<Arc<dyn TelemetrySource>> {
    let source: Arc<dyn TelemetrySource> = match kind {
        TelemetrySourceKind::AlphaEss => Arc::new(AlphaEssSource::new(
            config.telemetry.alpha_ess.clone(),
            config.telemetry.voltage_fallback,
        )?),
        TelemetrySourceKind::Sungather => {
            Arc::new(SungatherSource::new(config.telemetry.sungather.clone())?)
        }
        TelemetrySourceKind::Sungrow => {
            Arc::new(SungrowSource::new(config.telemetry.sungrow.clone())?)
        }
    };
    Ok(source)
}

fn build_vehicle(config: &Config, dry_run: bool) -> Result<Arc<dyn VehicleClient>> {
    let client = TeslaControlClient::new(config.tesla.clone())?;
    Ok(if dry_run {
        Arc::new(DryRunVehicle::new(client))
    } else {
        Arc::new(client)
    })
}

fn build_strategy(
    config: &Config,
    kind: StrategyKind,
    smoothing: bool,
    telemetry: &Arc<dyn TelemetrySource>,
    battery: watch::Receiver<Option<BatteryState>>,
) -> Result<Box<dyn ChargingSpeedStrategy>> {
    let charging = &config.charging;
    let strategies = &config.strategy;
    let base: Box<dyn ChargingSpeedStrategy> = match kind {
        StrategyKind::Aggressive => Box::new(AggressiveStrategy::new(
            Arc::clone(telemetry),
            charging.buffer_watts,
            strategies.multiple_of,
            charging.max_ampere,
        )),
        StrategyKind::Conservative => Box::new(ConservativeStrategy::new(
            Arc::clone(telemetry),
            charging.buffer_watts,
            strategies.conservative.window_minutes,
        )),
        StrategyKind::Fixed => Box::new(FixedStrategy::new(
            Arc::clone(telemetry),
            strategies.fixed.ampere,
            charging.buffer_watts,
            charging.max_ampere,
        )?),
        StrategyKind::FeedIn => Box::new(FeedInStrategy::new(
            Arc::clone(telemetry),
            strategies.feed_in.max_feed_in_watts,
        )),
        StrategyKind::Weather => {
            let forecast: Arc<dyn SolarForecast> =
                Arc::new(SolcastSource::new(config.solcast.clone())?);
            Box::new(WeatherStrategy::new(
                Arc::clone(telemetry),
                forecast,
                battery,
                strategies.weather.clone(),
                strategies.multiple_of,
                charging.max_ampere,
            ))
        }
    };
    Ok(if smoothing {
        Box::new(SmoothingStrategy::new(
            base,
            Arc::clone(telemetry),
            strategies.smoothing.required_consistent_reads,
        ))
    } else {
        base
    })
}
