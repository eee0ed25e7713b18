//! # Helion - Solar Surplus EV Charging
//!
//! Helion charges an EV from rooftop solar surplus: it polls household
//! telemetry, lets a pluggable strategy translate the surplus into a target
//! current and drives a Tesla to that current, backing off the moment the
//! grid would be tapped.
//!
//! ## Features
//!
//! - **Async-first**: control loop, watchdog and caches on the Tokio runtime
//! - **Pluggable strategies**: aggressive, conservative, fixed, feed-in and
//!   a weather-aware buffer fed by Solcast forecasts
//! - **Three telemetry backends**: AlphaESS cloud, SunGather via InfluxDB,
//!   or direct Sungrow Modbus TCP
//! - **Production watchdog**: settle windows race a grid-import monitor so
//!   a passing cloud never burns paid energy
//! - **Session accounting**: energy split, fluctuation count and import
//!   cost reported at the end of every run
//! - **Configuration**: YAML-based configuration with validation and
//!   environment overlays for credentials
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `telemetry`: Household power measurement adapters
//! - `charger`: Control loop and session lifecycle
//! - `watchdog`: Production-drop monitor racing the settle windows
//! - `strategy`: Charging speed strategies and the smoothing decorator
//! - `forecast`: Solcast rooftop forecast client
//! - `battery`: Cached vehicle battery state
//! - `vehicle`: Tesla command plumbing
//! - `session`: Charging session accounting
//! - `events`: Event bus and observer sinks

pub mod battery;
pub mod charger;
pub mod config;
pub mod error;
pub mod events;
pub mod forecast;
pub mod logging;
pub mod session;
pub mod strategy;
pub mod telemetry;
pub mod vehicle;
pub mod watchdog;

// Re-export commonly used types
pub use charger::ChargeController;
pub use config::Config;
pub use error::{HelionError, Result};
