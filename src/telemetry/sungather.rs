//! SunGather/InfluxDB telemetry adapter
//!
//! SunGather scrapes the inverter and writes measurements into InfluxDB;
//! this adapter reads them back with Flux queries over the v2 HTTP API.
//! Responses arrive as annotated CSV, which is parsed positionally by the
//! `_field`/`_value` header columns.

use async_trait::async_trait;
use std::time::Duration;

use super::{Field, TelemetryError, TelemetrySnapshot, TelemetrySource};
use crate::config::SungatherConfig;
use crate::error::HelionError;
use crate::logging::{StructuredLogger, get_logger};

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How far back "latest" may reach before it counts as stale
const LATEST_RANGE_MINUTES: u32 = 2;

/// Telemetry source backed by a SunGather-fed InfluxDB bucket
pub struct SungatherSource {
    config: SungatherConfig,
    client: reqwest::Client,
    logger: StructuredLogger,
}

impl SungatherSource {
    pub fn new(config: SungatherConfig) -> crate::error::Result<Self> {
        if config.url.is_empty() {
            return Err(HelionError::config("InfluxDB url is required"));
        }
        if config.token.is_empty() || config.org.is_empty() || config.bucket.is_empty() {
            return Err(HelionError::config(
                "InfluxDB token, org and bucket are required",
            ));
        }
        let client = reqwest::Client::builder().timeout(QUERY_TIMEOUT).build()?;
        Ok(Self {
            config,
            client,
            logger: get_logger("sungather"),
        })
    }

    fn latest_flux(&self, fields: &[Field]) -> String {
        let filter = fields
            .iter()
            .map(|f| format!("r._field == \"{}\"", f.as_str()))
            .collect::<Vec<_>>()
            .join(" or ");
        format!(
            "from(bucket: \"{}\")\n  |> range(start: -{}m)\n  |> filter(fn: (r) => {})\n  |> last()",
            self.config.bucket, LATEST_RANGE_MINUTES, filter
        )
    }

    fn window_min_flux(&self, field: Field, minutes: u32) -> String {
        format!(
            "from(bucket: \"{}\")\n  |> range(start: -{}m)\n  |> filter(fn: (r) => r._field == \"{}\")\n  |> min()",
            self.config.bucket,
            minutes,
            field.as_str()
        )
    }

    async fn run_query(&self, flux: String) -> std::result::Result<String, TelemetryError> {
        let url = format!("{}/api/v2/query?org={}", self.config.url, self.config.org);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/vnd.flux")
            .header(reqwest::header::ACCEPT, "application/csv")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.config.token),
            )
            .body(flux)
            .send()
            .await
            .map_err(|e| TelemetryError::source_unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::source_unavailable(format!(
                "InfluxDB query failed: HTTP {}",
                status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| TelemetryError::source_unavailable(e.to_string()))
    }
}

/// Parse annotated CSV from the Flux API into (field, value) pairs.
///
/// Annotation lines start with `#`; the first remaining line is the header.
/// Rows with an unknown field name or an unparsable value are skipped.
pub fn parse_annotated_csv(text: &str) -> Vec<(Field, f64)> {
    let mut lines = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split(',').collect();
    let Some(field_idx) = columns.iter().position(|c| *c == "_field") else {
        return Vec::new();
    };
    let Some(value_idx) = columns.iter().position(|c| *c == "_value") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for line in lines {
        let cells: Vec<&str> = line.split(',').collect();
        let name = cells.get(field_idx).copied().unwrap_or_default();
        let raw = cells.get(value_idx).copied().unwrap_or_default();
        if let (Some(field), Ok(value)) = (Field::from_wire(name), raw.parse::<f64>()) {
            out.push((field, value));
        }
    }
    out
}

#[async_trait]
impl TelemetrySource for SungatherSource {
    async fn query_latest_values(
        &self,
        fields: &[Field],
    ) -> std::result::Result<TelemetrySnapshot, TelemetryError> {
        let text = self.run_query(self.latest_flux(fields)).await?;
        let rows = parse_annotated_csv(&text);
        if rows.is_empty() {
            return Err(TelemetryError::no_data(format!(
                "no rows in the last {}m",
                LATEST_RANGE_MINUTES
            )));
        }
        let snapshot: TelemetrySnapshot = rows.into_iter().collect();
        self.logger
            .debug(&format!("SunGather snapshot: {} fields", snapshot.len()));
        Ok(snapshot)
    }

    async fn lowest_value_in_window(
        &self,
        field: Field,
        minutes: u32,
    ) -> std::result::Result<f64, TelemetryError> {
        let text = self.run_query(self.window_min_flux(field, minutes)).await?;
        let rows = parse_annotated_csv(&text);
        rows.into_iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v)
            .ok_or_else(|| {
                TelemetryError::no_data(format!("no {} rows in the last {}m", field, minutes))
            })
    }
}
