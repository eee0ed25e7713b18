//! Tesla vehicle client
//!
//! Commands go through the `tesla-control` binary (BLE/Fleet signing stays
//! in the vendor tool); this module classifies its stderr, retries command
//! timeouts with exponential backoff and keeps the OAuth2 token pair fresh
//! on disk where `tesla-control` picks the access token up.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;

use super::{VehicleChargeState, VehicleClient, VehicleError};
use crate::config::TeslaConfig;
use crate::logging::{StructuredLogger, get_logger};

const STDERR_ASLEEP: &str = "vehicle is offline or asleep";
const STDERR_TIMEOUT: &str = "context deadline exceeded";
const STDERR_ALREADY_CHARGING: &str = "car could not execute command: is_charging";

/// Persisted token pair, `token.json`
#[derive(Debug, Serialize, Deserialize)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

/// Token endpoint response; extra fields are ignored
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

/// Charge section of `tesla-control state charge`
#[derive(Debug, Deserialize)]
struct ChargeStatePayload {
    #[serde(alias = "batteryLevel")]
    battery_level: f64,
    #[serde(alias = "chargeLimitSoc")]
    charge_limit_soc: f64,
    #[serde(alias = "chargeEnergyAdded", default)]
    charge_energy_added: f64,
}

#[derive(Debug, Deserialize)]
struct StatePayload {
    #[serde(alias = "chargeState")]
    charge_state: ChargeStatePayload,
}

enum ExecError {
    Asleep,
    /// tesla-control hit its own deadline; worth retrying
    Timeout,
    Failed {
        message: String,
        stderr: String,
    },
}

/// Vehicle client backed by the tesla-control binary
pub struct TeslaControlClient {
    config: TeslaConfig,
    http: reqwest::Client,
    logger: StructuredLogger,
}

impl TeslaControlClient {
    pub fn new(config: TeslaConfig) -> crate::error::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            config,
            http,
            logger: get_logger("tesla"),
        })
    }

    fn command_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::new();
        if let Some(vin) = self.config.vin.as_deref() {
            full.push("-vin");
            full.push(vin);
        }
        full.extend_from_slice(args);
        full
    }

    async fn run_once(&self, args: &[&str]) -> std::result::Result<String, ExecError> {
        let output = Command::new(&self.config.control_command)
            .args(self.command_args(args))
            .output()
            .await
            .map_err(|e| ExecError::Failed {
                message: format!("execution failed: {}", e),
                stderr: String::new(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }
        Err(classify_failure(&stderr))
    }

    /// Run a command, retrying tesla-control deadline timeouts
    async fn exec(&self, args: &[&str]) -> std::result::Result<String, VehicleError> {
        let mut attempt: u32 = 0;
        loop {
            match self.run_once(args).await {
                Ok(stdout) => return Ok(stdout),
                Err(ExecError::Asleep) => return Err(VehicleError::Asleep),
                Err(ExecError::Timeout) if attempt < self.config.command_retries => {
                    let base = self.config.retry_base_delay().as_millis() as f64;
                    let delay = Duration::from_millis((base * 1.5f64.powi(attempt as i32)) as u64);
                    self.logger.debug(&format!(
                        "tesla-control deadline exceeded, retry {}/{} in {:?}",
                        attempt + 1,
                        self.config.command_retries,
                        delay
                    ));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(ExecError::Timeout) => {
                    return Err(VehicleError::command_failed(format!(
                        "Command timed out after {} attempts",
                        self.config.command_retries + 1
                    )));
                }
                Err(ExecError::Failed { message, stderr }) => {
                    return Err(VehicleError::CommandFailed {
                        message,
                        stderr: Some(stderr),
                    });
                }
            }
        }
    }

    async fn read_refresh_token(&self) -> std::result::Result<String, VehicleError> {
        let raw = tokio::fs::read_to_string(&self.config.token_file)
            .await
            .map_err(|e| {
                VehicleError::authentication_failed(format!(
                    "cannot read {}: {}",
                    self.config.token_file, e
                ))
            })?;
        let pair: TokenPair = serde_json::from_str(&raw).map_err(|e| {
            VehicleError::authentication_failed(format!(
                "cannot parse {}: {}",
                self.config.token_file, e
            ))
        })?;
        Ok(pair.refresh_token)
    }

    async fn save_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> std::result::Result<(), VehicleError> {
        let pair = TokenPair {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        };
        let encoded = serde_json::to_string_pretty(&pair)
            .map_err(|e| VehicleError::authentication_failed(e.to_string()))?;
        tokio::fs::write(&self.config.token_file, encoded)
            .await
            .map_err(|e| {
                VehicleError::authentication_failed(format!(
                    "cannot write {}: {}",
                    self.config.token_file, e
                ))
            })?;
        // tesla-control reads the bare access token from its own file
        tokio::fs::write(&self.config.access_token_file, access_token)
            .await
            .map_err(|e| {
                VehicleError::authentication_failed(format!(
                    "cannot write {}: {}",
                    self.config.access_token_file, e
                ))
            })?;
        Ok(())
    }
}

fn classify_failure(stderr: &str) -> ExecError {
    if stderr.contains(STDERR_ASLEEP) {
        return ExecError::Asleep;
    }
    if stderr.contains(STDERR_TIMEOUT) {
        return ExecError::Timeout;
    }
    ExecError::Failed {
        message: format!("Command failed. Stderr: {}", stderr.trim()),
        stderr: stderr.to_string(),
    }
}

fn parse_charge_state(stdout: &str) -> std::result::Result<VehicleChargeState, VehicleError> {
    let payload: StatePayload = serde_json::from_str(stdout).map_err(|e| {
        VehicleError::command_failed(format!("unrecognized charge state payload: {}", e))
    })?;
    Ok(VehicleChargeState {
        battery_level: payload.charge_state.battery_level,
        charge_limit: payload.charge_state.charge_limit_soc,
        charge_energy_added: payload.charge_state.charge_energy_added,
    })
}

#[async_trait]
impl VehicleClient for TeslaControlClient {
    async fn start_charging(&self) -> std::result::Result<(), VehicleError> {
        match self.exec(&["charging-start"]).await {
            Ok(_) => Ok(()),
            // Already charging is success for our purposes
            Err(VehicleError::CommandFailed {
                stderr: Some(ref stderr),
                ..
            }) if stderr.contains(STDERR_ALREADY_CHARGING) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn stop_charging(&self) -> std::result::Result<(), VehicleError> {
        self.exec(&["charging-stop"]).await.map(|_| ())
    }

    async fn set_ampere(&self, ampere: u32) -> std::result::Result<(), VehicleError> {
        self.exec(&["charging-set-amps", &ampere.to_string()])
            .await
            .map(|_| ())
    }

    async fn wake_up(&self) -> std::result::Result<(), VehicleError> {
        match self.exec(&["wake"]).await {
            Ok(_) => Ok(()),
            Err(VehicleError::Asleep) => Err(VehicleError::command_failed(
                "Vehicle is still asleep while issuing wakeup.",
            )),
            Err(e) => Err(e),
        }
    }

    async fn charge_state(&self) -> std::result::Result<VehicleChargeState, VehicleError> {
        let stdout = self.exec(&["state", "charge"]).await?;
        parse_charge_state(&stdout)
    }

    async fn refresh_access_token(&self) -> std::result::Result<(), VehicleError> {
        if self.config.oauth_client_id.is_empty() {
            return Err(VehicleError::authentication_failed(
                "oauth_client_id is not configured",
            ));
        }

        let refresh_token = self.read_refresh_token().await?;
        let response = self
            .http
            .post(&self.config.oauth_token_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "client_id": self.config.oauth_client_id,
                "refresh_token": refresh_token,
            }))
            .send()
            .await
            .map_err(|e| VehicleError::authentication_failed(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(VehicleError::authentication_failed(format!(
                "token endpoint returned HTTP {}",
                status
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| VehicleError::authentication_failed(e.to_string()))?;
        self.save_tokens(&tokens.access_token, &tokens.refresh_token)
            .await?;
        self.logger.info("Access token refreshed");
        Ok(())
    }
}
