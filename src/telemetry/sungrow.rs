//! Sungrow inverter Modbus telemetry adapter
//!
//! Reads the measurement registers straight off the inverter over Modbus
//! TCP: one input register per field with a shared multiplier, matching the
//! SunGather register layout. The device keeps no history, so the window
//! minimum degrades to the current value with a warning.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

use super::{Field, TelemetryError, TelemetrySnapshot, TelemetrySource};
use crate::config::SungrowConfig;
use crate::error::HelionError;
use crate::logging::{StructuredLogger, get_logger};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Telemetry source reading the inverter directly over Modbus TCP
pub struct SungrowSource {
    config: SungrowConfig,
    ctx: Mutex<Option<tokio_modbus::client::Context>>,
    logger: StructuredLogger,
}

impl SungrowSource {
    pub fn new(config: SungrowConfig) -> crate::error::Result<Self> {
        if config.host.is_empty() {
            return Err(HelionError::config("Sungrow host is required"));
        }
        Ok(Self {
            config,
            ctx: Mutex::new(None),
            logger: get_logger("sungrow"),
        })
    }

    fn register_for(&self, field: Field) -> u16 {
        let registers = &self.config.registers;
        match field {
            Field::Voltage => registers.voltage,
            Field::CurrentProduction => registers.current_production,
            Field::CurrentLoad => registers.current_load,
            Field::DailyImport => registers.daily_import,
            Field::ExportToGrid => registers.export_to_grid,
            Field::ImportFromGrid => registers.import_from_grid,
        }
    }

    async fn connect(&self) -> std::result::Result<tokio_modbus::client::Context, TelemetryError> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr: SocketAddr = address.parse().map_err(|e| {
            TelemetryError::source_unavailable(format!("invalid address {}: {}", address, e))
        })?;

        self.logger
            .debug(&format!("Connecting to inverter at {}", address));
        match timeout(
            CONNECT_TIMEOUT,
            tcp::connect_slave(socket_addr, Slave(self.config.slave_id)),
        )
        .await
        {
            Ok(Ok(ctx)) => Ok(ctx),
            Ok(Err(e)) => Err(TelemetryError::source_unavailable(format!(
                "connect to {} failed: {}",
                address, e
            ))),
            Err(_) => Err(TelemetryError::source_unavailable(format!(
                "connect to {} timed out",
                address
            ))),
        }
    }

    async fn try_read(
        &self,
        ctx_slot: &mut Option<tokio_modbus::client::Context>,
        address: u16,
    ) -> std::result::Result<f64, TelemetryError> {
        let ctx = ctx_slot
            .as_mut()
            .ok_or_else(|| TelemetryError::source_unavailable("not connected"))?;

        match timeout(OPERATION_TIMEOUT, ctx.read_input_registers(address, 1)).await {
            Ok(Ok(Ok(words))) => {
                let raw = words.first().copied().ok_or_else(|| {
                    TelemetryError::no_data(format!("register {} returned no words", address))
                })?;
                Ok(raw as f64 * self.config.register_multiplier)
            }
            Ok(Ok(Err(e))) => {
                // Connection is suspect after any failed read
                ctx_slot.take();
                Err(TelemetryError::source_unavailable(format!(
                    "register {} read failed: {}",
                    address, e
                )))
            }
            Ok(Err(e)) => {
                ctx_slot.take();
                Err(TelemetryError::source_unavailable(format!(
                    "register {} read failed: {}",
                    address, e
                )))
            }
            Err(_) => {
                ctx_slot.take();
                Err(TelemetryError::source_unavailable(format!(
                    "register {} read timed out",
                    address
                )))
            }
        }
    }

    async fn read_register(&self, address: u16) -> std::result::Result<f64, TelemetryError> {
        let mut guard = self.ctx.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }

        match self.try_read(&mut guard, address).await {
            Ok(value) => Ok(value),
            Err(TelemetryError::SourceUnavailable { message }) => {
                self.logger
                    .warn(&format!("Modbus read failed ({}), reconnecting", message));
                *guard = Some(self.connect().await?);
                self.try_read(&mut guard, address).await
            }
            Err(e) => Err(e),
        }
    }

    async fn read_field(&self, field: Field) -> std::result::Result<f64, TelemetryError> {
        self.read_register(self.register_for(field)).await
    }
}

#[async_trait]
impl TelemetrySource for SungrowSource {
    async fn query_latest_values(
        &self,
        fields: &[Field],
    ) -> std::result::Result<TelemetrySnapshot, TelemetryError> {
        let mut snapshot = TelemetrySnapshot::new();
        for &field in fields {
            snapshot.insert(field, self.read_field(field).await?);
        }
        Ok(snapshot)
    }

    async fn lowest_value_in_window(
        &self,
        field: Field,
        minutes: u32,
    ) -> std::result::Result<f64, TelemetryError> {
        // The inverter exposes spot values only
        self.logger.warn(&format!(
            "No {}-minute history on the inverter, using the current {} value",
            minutes, field
        ));
        self.read_field(field).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_mapping_uses_config() {
        let source = SungrowSource::new(SungrowConfig::default()).unwrap();
        assert_eq!(source.register_for(Field::Voltage), 30001);
        assert_eq!(source.register_for(Field::CurrentProduction), 30013);
        assert_eq!(source.register_for(Field::CurrentLoad), 30025);
        assert_eq!(source.register_for(Field::DailyImport), 30037);
        assert_eq!(source.register_for(Field::ExportToGrid), 30049);
        assert_eq!(source.register_for(Field::ImportFromGrid), 30061);
    }

    #[test]
    fn test_register_overrides() {
        let mut config = SungrowConfig::default();
        config.registers.voltage = 5018;
        let source = SungrowSource::new(config).unwrap();
        assert_eq!(source.register_for(Field::Voltage), 5018);
    }

    #[test]
    fn test_empty_host_rejected() {
        let config = SungrowConfig {
            host: String::new(),
            ..SungrowConfig::default()
        };
        assert!(SungrowSource::new(config).is_err());
    }
}
