//! Configuration management for Helion
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files with support for environment variable
//! overrides for credentials.

use crate::error::{HelionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Control loop timing configuration
    pub timing: TimingConfig,

    /// Charging limits and retry policy
    pub charging: ChargingConfig,

    /// Household telemetry source configuration
    pub telemetry: TelemetryConfig,

    /// Tesla vehicle command configuration
    pub tesla: TeslaConfig,

    /// Solcast solar forecast configuration
    pub solcast: SolcastConfig,

    /// Charging speed strategy configuration
    pub strategy: StrategyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Control loop timing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Interval between charging speed synchronizations in milliseconds
    pub sync_interval_ms: u64,

    /// How long the vehicle needs to come online after a wake command, in milliseconds
    pub vehicle_awakening_time_ms: u64,

    /// Idle time after which the vehicle is assumed asleep again, in seconds
    pub inactivity_time_seconds: u64,

    /// Settle time per ampere of change, in seconds
    pub wait_per_ampere_seconds: u64,

    /// Extra settle time when charging just started, in seconds
    pub extra_wait_on_charge_start_seconds: u64,

    /// Extra pause after stopping a charge, in seconds
    pub extra_wait_on_charge_stop_seconds: u64,

    /// Optional hard cap on session runtime, in minutes
    pub max_runtime_minutes: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 5_000,
            vehicle_awakening_time_ms: 30_000,
            inactivity_time_seconds: 180,
            wait_per_ampere_seconds: 2,
            extra_wait_on_charge_start_seconds: 10,
            extra_wait_on_charge_stop_seconds: 1,
            max_runtime_minutes: None,
        }
    }
}

impl TimingConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn vehicle_awakening_time(&self) -> Duration {
        Duration::from_millis(self.vehicle_awakening_time_ms)
    }

    pub fn inactivity_time(&self) -> Duration {
        Duration::from_secs(self.inactivity_time_seconds)
    }

    pub fn wait_per_ampere(&self) -> Duration {
        Duration::from_secs(self.wait_per_ampere_seconds)
    }

    pub fn extra_wait_on_charge_start(&self) -> Duration {
        Duration::from_secs(self.extra_wait_on_charge_start_seconds)
    }

    pub fn extra_wait_on_charge_stop(&self) -> Duration {
        Duration::from_secs(self.extra_wait_on_charge_stop_seconds)
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_minutes.map(|m| Duration::from_secs(m * 60))
    }
}

/// Charging limits and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargingConfig {
    /// Below this current the charge is stopped instead of throttled
    pub min_ampere: u32,

    /// Hardware ceiling for the charging current
    pub max_ampere: u32,

    /// Safety margin in watts kept between production and consumption
    pub buffer_watts: f64,

    /// Wake attempts before giving up on a sleeping vehicle
    pub wake_attempts: u32,

    /// Retries after the watchdog reports a production drop
    pub production_drop_retries: u32,

    /// Watchdog telemetry poll interval in milliseconds
    pub watchdog_poll_interval_ms: u64,

    /// Minimum time between vehicle battery state queries, in minutes
    pub battery_refresh_cooldown_minutes: u64,

    /// Grid import rate used for the session cost estimate
    pub grid_import_cost_per_kwh: f64,

    /// Currency symbol for the session summary
    pub currency_symbol: String,
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            min_ampere: 3,
            max_ampere: 32,
            buffer_watts: 200.0,
            wake_attempts: 3,
            production_drop_retries: 10,
            watchdog_poll_interval_ms: 3_000,
            battery_refresh_cooldown_minutes: 10,
            grid_import_cost_per_kwh: 0.25,
            currency_symbol: "€".to_string(),
        }
    }
}

impl ChargingConfig {
    pub fn watchdog_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_poll_interval_ms)
    }

    pub fn battery_refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.battery_refresh_cooldown_minutes * 60)
    }
}

/// Which telemetry adapter feeds the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySourceKind {
    /// AlphaESS Open API cloud polling
    AlphaEss,
    /// SunGather metrics stored in InfluxDB
    Sungather,
    /// Direct Modbus TCP reads from a Sungrow inverter
    Sungrow,
}

impl FromStr for TelemetrySourceKind {
    type Err = HelionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "alpha_ess" | "alphaess" => Ok(Self::AlphaEss),
            "sungather" | "influx" => Ok(Self::Sungather),
            "sungrow" | "modbus" => Ok(Self::Sungrow),
            other => Err(HelionError::config(format!(
                "Unknown telemetry source: {}",
                other
            ))),
        }
    }
}

/// Household telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Selected adapter
    pub source: TelemetrySourceKind,

    /// Grid voltage reported when the source cannot measure it
    pub voltage_fallback: f64,

    /// AlphaESS Open API adapter settings
    pub alpha_ess: AlphaEssConfig,

    /// SunGather/InfluxDB adapter settings
    pub sungather: SungatherConfig,

    /// Sungrow Modbus adapter settings
    pub sungrow: SungrowConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            source: TelemetrySourceKind::AlphaEss,
            voltage_fallback: 235.0,
            alpha_ess: AlphaEssConfig::default(),
            sungather: SungatherConfig::default(),
            sungrow: SungrowConfig::default(),
        }
    }
}

/// AlphaESS Open API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaEssConfig {
    /// API base URL
    pub api_url: String,

    /// Application ID issued by AlphaESS
    pub app_id: String,

    /// Application secret used for request signing
    pub app_secret: String,

    /// Inverter serial number (sysSn)
    pub serial_number: String,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Retries on transport failures
    pub max_retries: u32,

    /// Base delay for the exponential retry backoff, in milliseconds
    pub retry_base_delay_ms: u64,
}

impl Default for AlphaEssConfig {
    fn default() -> Self {
        Self {
            api_url: "https://openapi.alphaess.com".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            serial_number: String::new(),
            timeout_ms: 5_000,
            max_retries: 5,
            retry_base_delay_ms: 2_000,
        }
    }
}

/// SunGather/InfluxDB settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SungatherConfig {
    /// InfluxDB base URL
    pub url: String,

    /// InfluxDB API token
    pub token: String,

    /// InfluxDB organization
    pub org: String,

    /// Bucket holding the SunGather measurements
    pub bucket: String,
}

/// Sungrow inverter Modbus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SungrowConfig {
    /// Inverter IP address
    pub host: String,

    /// TCP port (typically 502)
    pub port: u16,

    /// Modbus slave ID
    pub slave_id: u8,

    /// Input register addresses per field
    pub registers: SungrowRegisters,

    /// Multiplier applied to raw register values
    pub register_multiplier: f64,
}

impl Default for SungrowConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.193".to_string(),
            port: 502,
            slave_id: 1,
            registers: SungrowRegisters::default(),
            register_multiplier: 0.1,
        }
    }
}

/// Input register layout of the inverter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SungrowRegisters {
    pub voltage: u16,
    pub current_production: u16,
    pub current_load: u16,
    pub daily_import: u16,
    pub export_to_grid: u16,
    pub import_from_grid: u16,
}

impl Default for SungrowRegisters {
    fn default() -> Self {
        Self {
            voltage: 30001,
            current_production: 30013,
            current_load: 30025,
            daily_import: 30037,
            export_to_grid: 30049,
            import_from_grid: 30061,
        }
    }
}

/// Tesla vehicle command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeslaConfig {
    /// Path to the tesla-control binary
    pub control_command: String,

    /// Vehicle identification number passed to tesla-control, when set
    pub vin: Option<String>,

    /// Internal retries for command timeouts
    pub command_retries: u32,

    /// Base delay for the command retry backoff, in milliseconds
    pub retry_base_delay_ms: u64,

    /// OAuth2 token endpoint
    pub oauth_token_url: String,

    /// OAuth2 client ID for the refresh-token grant
    pub oauth_client_id: String,

    /// File holding the serialized token pair
    pub token_file: String,

    /// File holding just the access token for tesla-control
    pub access_token_file: String,
}

impl Default for TeslaConfig {
    fn default() -> Self {
        Self {
            control_command: "tesla-control".to_string(),
            vin: None,
            command_retries: 9,
            retry_base_delay_ms: 100,
            oauth_token_url: "https://fleet-auth.prd.vn.cloud.tesla.com/oauth2/v3/token"
                .to_string(),
            oauth_client_id: String::new(),
            token_file: "token.json".to_string(),
            access_token_file: ".access-token".to_string(),
        }
    }
}

impl TeslaConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Solcast rooftop forecast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolcastConfig {
    /// Solcast API base URL
    pub api_url: String,

    /// Rooftop site resource ID
    pub resource_id: String,

    /// API key
    pub api_key: String,

    /// In-memory cache lifetime in minutes
    pub cache_ttl_minutes: u64,

    /// On-disk cache file
    pub cache_file: String,

    /// Maximum age of the on-disk cache, in hours
    pub cache_max_age_hours: u64,
}

impl Default for SolcastConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.solcast.com.au".to_string(),
            resource_id: String::new(),
            api_key: String::new(),
            cache_ttl_minutes: 60,
            cache_file: ".solcast-cache.json".to_string(),
            cache_max_age_hours: 48,
        }
    }
}

impl SolcastConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    pub fn cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_max_age_hours as i64)
    }
}

/// Which charging speed strategy drives the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Track the instantaneous surplus
    Aggressive,
    /// Track the trailing-window production minimum
    Conservative,
    /// Fixed current whenever enough surplus exists
    Fixed,
    /// Absorb production above the allowed feed-in
    FeedIn,
    /// Surplus tracking with a forecast-scaled buffer
    Weather,
}

impl FromStr for StrategyKind {
    type Err = HelionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "aggressive" => Ok(Self::Aggressive),
            "conservative" => Ok(Self::Conservative),
            "fixed" => Ok(Self::Fixed),
            "feed_in" | "feedin" => Ok(Self::FeedIn),
            "weather" => Ok(Self::Weather),
            other => Err(HelionError::config(format!("Unknown strategy: {}", other))),
        }
    }
}

/// Charging speed strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Strategy used when the CLI does not override it
    pub default: StrategyKind,

    /// Round the target current down to a multiple of this
    pub multiple_of: u32,

    /// Smoothing decorator settings
    pub smoothing: SmoothingConfig,

    /// Conservative strategy settings
    pub conservative: ConservativeConfig,

    /// Fixed strategy settings
    pub fixed: FixedConfig,

    /// Feed-in strategy settings
    pub feed_in: FeedInConfig,

    /// Weather-aware buffer settings
    pub weather: WeatherConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            default: StrategyKind::Aggressive,
            multiple_of: 3,
            smoothing: SmoothingConfig::default(),
            conservative: ConservativeConfig::default(),
            fixed: FixedConfig::default(),
            feed_in: FeedInConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

/// Smoothing decorator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Whether increases are smoothed at all
    pub enabled: bool,

    /// Consecutive fresh higher readings required before an increase
    pub required_consistent_reads: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required_consistent_reads: 3,
        }
    }
}

/// Conservative strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConservativeConfig {
    /// Width of the trailing production window, in minutes
    pub window_minutes: u32,
}

impl Default for ConservativeConfig {
    fn default() -> Self {
        Self { window_minutes: 30 }
    }
}

/// Fixed strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedConfig {
    /// Current to charge with when enough surplus exists
    pub ampere: u32,
}

impl Default for FixedConfig {
    fn default() -> Self {
        Self { ampere: 16 }
    }
}

/// Feed-in strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedInConfig {
    /// Export power the grid operator allows, in watts
    pub max_feed_in_watts: f64,
}

impl Default for FeedInConfig {
    fn default() -> Self {
        Self {
            max_feed_in_watts: 2_000.0,
        }
    }
}

/// Weather-aware buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Site latitude in degrees, used by the solar position model
    pub latitude: f64,

    /// Peak production capacity of the installation, in kW
    pub peak_production_kw: f64,

    /// Optional per-month peak factors; derived from latitude when absent
    pub monthly_factors: Option<Vec<f64>>,

    /// Buffer floor in watts
    pub min_buffer_watts: f64,

    /// Buffer multiplier applied at zero forecast confidence
    pub buffer_multiplier_max: f64,

    /// Usable battery capacity of the vehicle, in kWh
    pub battery_capacity_kwh: f64,

    /// Hour after which solar charging is not simulated
    pub solar_cutoff_hour: u32,

    /// Optional hour by which the charge should be complete
    pub deadline_hour: Option<u32>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            latitude: 52.0,
            peak_production_kw: 8.0,
            monthly_factors: None,
            min_buffer_watts: 200.0,
            buffer_multiplier_max: 3.0,
            battery_capacity_kwh: 75.0,
            solar_cutoff_hour: 18,
            deadline_hour: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file or log directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/helion.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations, then overlay
    /// credentials from the environment
    pub fn load() -> Result<Self> {
        let default_paths = ["helion.yaml", "/etc/helion/config.yaml"];

        let mut config = Config::default();
        for path in &default_paths {
            if Path::new(path).exists() {
                config = Self::from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Overlay credentials and rates from process environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|name| std::env::var(name).ok());
    }

    fn apply_overrides_with<F: Fn(&str) -> Option<String>>(&mut self, get: F) {
        if let Some(v) = get("ALPHA_ESS_APP_ID") {
            self.telemetry.alpha_ess.app_id = v;
        }
        if let Some(v) = get("ALPHA_ESS_APP_SECRET") {
            self.telemetry.alpha_ess.app_secret = v;
        }
        if let Some(v) = get("ALPHA_ESS_SYS_SN") {
            self.telemetry.alpha_ess.serial_number = v;
        }
        if let Some(v) = get("INFLUX_URL") {
            self.telemetry.sungather.url = v;
        }
        if let Some(v) = get("INFLUX_TOKEN") {
            self.telemetry.sungather.token = v;
        }
        if let Some(v) = get("INFLUX_ORG") {
            self.telemetry.sungather.org = v;
        }
        if let Some(v) = get("INFLUX_BUCKET") {
            self.telemetry.sungather.bucket = v;
        }
        if let Some(v) = get("TESLA_OAUTH2_CLIENT_ID") {
            self.tesla.oauth_client_id = v;
        }
        if let Some(v) = get("SOLCAST_API_KEY") {
            self.solcast.api_key = v;
        }
        if let Some(v) = get("SOLCAST_RESOURCE_ID") {
            self.solcast.resource_id = v;
        }
        if let Some(v) = get("GRID_IMPORT_COST_PER_KWH")
            && let Ok(rate) = v.parse::<f64>()
        {
            self.charging.grid_import_cost_per_kwh = rate;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.timing.sync_interval_ms == 0 {
            return Err(HelionError::validation(
                "timing.sync_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.charging.min_ampere == 0 {
            return Err(HelionError::validation(
                "charging.min_ampere",
                "Must be at least 1",
            ));
        }

        if self.charging.max_ampere < self.charging.min_ampere {
            return Err(HelionError::validation(
                "charging.max_ampere",
                "Must be at least min_ampere",
            ));
        }

        if self.charging.max_ampere > 32 {
            return Err(HelionError::validation(
                "charging.max_ampere",
                "Hardware ceiling is 32 A",
            ));
        }

        if self.charging.buffer_watts < 0.0 {
            return Err(HelionError::validation(
                "charging.buffer_watts",
                "Cannot be negative",
            ));
        }

        if self.charging.watchdog_poll_interval_ms == 0 {
            return Err(HelionError::validation(
                "charging.watchdog_poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.strategy.multiple_of == 0 {
            return Err(HelionError::validation(
                "strategy.multiple_of",
                "Must be at least 1",
            ));
        }

        if self.strategy.smoothing.required_consistent_reads == 0 {
            return Err(HelionError::validation(
                "strategy.smoothing.required_consistent_reads",
                "Must be at least 1",
            ));
        }

        if self.strategy.fixed.ampere > self.charging.max_ampere {
            return Err(HelionError::validation(
                "strategy.fixed.ampere",
                "Cannot exceed charging.max_ampere",
            ));
        }

        if !(-90.0..=90.0).contains(&self.strategy.weather.latitude) {
            return Err(HelionError::validation(
                "strategy.weather.latitude",
                "Must be between -90 and 90",
            ));
        }

        if self.strategy.weather.solar_cutoff_hour > 24 {
            return Err(HelionError::validation(
                "strategy.weather.solar_cutoff_hour",
                "Must be between 0 and 24",
            ));
        }

        if let Some(deadline) = self.strategy.weather.deadline_hour
            && deadline > 24
        {
            return Err(HelionError::validation(
                "strategy.weather.deadline_hour",
                "Must be between 0 and 24",
            ));
        }

        if let Some(factors) = &self.strategy.weather.monthly_factors
            && factors.len() != 12
        {
            return Err(HelionError::validation(
                "strategy.weather.monthly_factors",
                "Must list exactly 12 values",
            ));
        }

        if self.telemetry.voltage_fallback <= 0.0 {
            return Err(HelionError::validation(
                "telemetry.voltage_fallback",
                "Must be positive",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timing.sync_interval_ms, 5_000);
        assert_eq!(config.charging.min_ampere, 3);
        assert_eq!(config.charging.max_ampere, 32);
        assert_eq!(config.telemetry.source, TelemetrySourceKind::AlphaEss);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.timing.sync_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.charging.max_ampere = 40;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.charging.max_ampere = 2;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.strategy.weather.monthly_factors = Some(vec![1.0; 11]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            config.timing.sync_interval_ms,
            deserialized.timing.sync_interval_ms
        );
        assert_eq!(config.telemetry.source, deserialized.telemetry.source);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "charging:\n  min_ampere: 5\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.charging.min_ampere, 5);
        assert_eq!(config.charging.max_ampere, 32);
        assert_eq!(config.timing.sync_interval_ms, 5_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides_with(|name| match name {
            "ALPHA_ESS_APP_ID" => Some("id123".to_string()),
            "ALPHA_ESS_APP_SECRET" => Some("secret".to_string()),
            "GRID_IMPORT_COST_PER_KWH" => Some("0.31".to_string()),
            _ => None,
        });
        assert_eq!(config.telemetry.alpha_ess.app_id, "id123");
        assert_eq!(config.telemetry.alpha_ess.app_secret, "secret");
        assert!((config.charging.grid_import_cost_per_kwh - 0.31).abs() < f64::EPSILON);
        // Untouched values keep their defaults
        assert_eq!(config.solcast.cache_ttl_minutes, 60);
    }

    #[test]
    fn test_strategy_kind_from_str() {
        assert_eq!(
            "feed-in".parse::<StrategyKind>().unwrap(),
            StrategyKind::FeedIn
        );
        assert_eq!(
            "Aggressive".parse::<StrategyKind>().unwrap(),
            StrategyKind::Aggressive
        );
        assert!("solar".parse::<StrategyKind>().is_err());

        assert_eq!(
            "alpha-ess".parse::<TelemetrySourceKind>().unwrap(),
            TelemetrySourceKind::AlphaEss
        );
        assert!("none".parse::<TelemetrySourceKind>().is_err());
    }
}
