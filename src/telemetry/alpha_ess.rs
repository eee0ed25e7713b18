//! AlphaESS Open API telemetry adapter
//!
//! Polls the cloud endpoint the AlphaESS storage system reports to. Every
//! request carries a SHA-512 signature over app id, secret and timestamp as
//! the Open API requires. Transport failures and timeouts are retried with
//! exponential backoff; HTTP error statuses and empty payloads are not.

use async_trait::async_trait;
use ring::digest;
use serde::Deserialize;
use std::time::Duration;

use super::{Field, TelemetryError, TelemetrySnapshot, TelemetrySource};
use crate::config::AlphaEssConfig;
use crate::error::HelionError;
use crate::logging::{StructuredLogger, get_logger};

/// Subset of the getLastPowerData payload the controller consumes
#[derive(Debug, Clone, Deserialize)]
struct PowerData {
    /// Solar production in watts
    ppv: f64,
    /// Household load in watts
    pload: f64,
    /// Grid power in watts, positive when importing
    pgrid: f64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<PowerData>,
}

enum FetchError {
    /// Transport-level failure worth retrying
    Retryable(String),
    /// Terminal failure reaching or reading the source
    Unavailable(String),
    /// The source answered but has nothing for us
    NoData(String),
}

/// Telemetry source backed by the AlphaESS cloud API
pub struct AlphaEssSource {
    config: AlphaEssConfig,
    voltage_fallback: f64,
    client: reqwest::Client,
    logger: StructuredLogger,
}

impl AlphaEssSource {
    pub fn new(config: AlphaEssConfig, voltage_fallback: f64) -> crate::error::Result<Self> {
        if config.app_id.is_empty() || config.app_secret.is_empty() {
            return Err(HelionError::config(
                "AlphaESS app_id and app_secret are required",
            ));
        }
        if config.serial_number.is_empty() {
            return Err(HelionError::config("AlphaESS serial_number is required"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            config,
            voltage_fallback,
            client,
            logger: get_logger("alpha_ess"),
        })
    }

    /// Hex SHA-512 over app id, secret and the request timestamp
    fn sign(&self, timestamp: &str) -> String {
        let input = format!(
            "{}{}{}",
            self.config.app_id, self.config.app_secret, timestamp
        );
        let hash = digest::digest(&digest::SHA512, input.as_bytes());
        hash.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }

    async fn try_fetch(&self) -> std::result::Result<PowerData, FetchError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let url = format!(
            "{}/api/getLastPowerData?sysSn={}",
            self.config.api_url, self.config.serial_number
        );

        let response = self
            .client
            .get(&url)
            .header("appId", &self.config.app_id)
            .header("timeStamp", &timestamp)
            .header("sign", self.sign(&timestamp))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    FetchError::Retryable(e.to_string())
                } else {
                    FetchError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!("HTTP {}", status)));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Unavailable(format!("unrecognized response: {}", e)))?;

        if parsed.code != 200 {
            return Err(FetchError::NoData(format!(
                "API code {} ({})",
                parsed.code, parsed.msg
            )));
        }
        match parsed.data {
            Some(data) => Ok(data),
            None => Err(FetchError::NoData("payload contains no data".to_string())),
        }
    }

    async fn fetch_power_data(&self) -> std::result::Result<PowerData, TelemetryError> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_fetch().await {
                Ok(data) => {
                    self.logger.debug(&format!(
                        "AlphaESS reading: ppv={} pload={} pgrid={}",
                        data.ppv, data.pload, data.pgrid
                    ));
                    return Ok(data);
                }
                Err(FetchError::Retryable(msg)) if attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(
                        self.config
                            .retry_base_delay_ms
                            .saturating_mul(1 << attempt.min(10)),
                    );
                    self.logger.warn(&format!(
                        "AlphaESS request failed ({}), retry {}/{} in {:?}",
                        msg,
                        attempt + 1,
                        self.config.max_retries,
                        delay
                    ));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(FetchError::Retryable(msg)) | Err(FetchError::Unavailable(msg)) => {
                    return Err(TelemetryError::source_unavailable(msg));
                }
                Err(FetchError::NoData(msg)) => return Err(TelemetryError::no_data(msg)),
            }
        }
    }
}

/// The API reports grid power as one signed value; export and import are its
/// negative and positive halves. Voltage and the import counter are not
/// exposed at all.
fn map_field(field: Field, data: &PowerData, voltage_fallback: f64) -> f64 {
    match field {
        Field::Voltage => voltage_fallback,
        Field::CurrentProduction => data.ppv,
        Field::CurrentLoad => data.pload,
        Field::DailyImport => 0.0,
        Field::ExportToGrid => {
            if data.pgrid < 0.0 {
                data.pgrid.abs()
            } else {
                0.0
            }
        }
        Field::ImportFromGrid => {
            if data.pgrid > 0.0 {
                data.pgrid
            } else {
                0.0
            }
        }
    }
}

#[async_trait]
impl TelemetrySource for AlphaEssSource {
    async fn query_latest_values(
        &self,
        fields: &[Field],
    ) -> std::result::Result<TelemetrySnapshot, TelemetryError> {
        let data = self.fetch_power_data().await?;
        Ok(fields
            .iter()
            .map(|&field| (field, map_field(field, &data, self.voltage_fallback)))
            .collect())
    }

    async fn lowest_value_in_window(
        &self,
        _field: Field,
        _minutes: u32,
    ) -> std::result::Result<f64, TelemetryError> {
        // The cloud endpoint only serves the latest sample
        Err(TelemetryError::no_data(
            "AlphaESS source keeps no history window",
        ))
    }
}
