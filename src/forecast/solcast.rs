//! Solcast rooftop forecast source
//!
//! Solcast's hobbyist tier allows only a handful of API calls per day, so
//! this source is aggressive about caching: a fresh in-memory copy is served
//! for the TTL, a JSON file cache survives restarts, and a 429 latches the
//! source onto the file cache for the rest of the process lifetime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{Forecast, ForecastError, ForecastPeriod, SolarForecast};
use crate::config::SolcastConfig;
use crate::logging::{StructuredLogger, get_logger};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SolcastResponse {
    forecasts: Vec<ForecastPeriod>,
}

/// On-disk cache payload
#[derive(Debug, Serialize, Deserialize)]
struct FileCache {
    fetched_at: DateTime<Utc>,
    forecasts: Vec<ForecastPeriod>,
}

struct CacheState {
    memory: Option<(Forecast, Instant)>,
    /// Set on the first 429; cleared only by a process restart
    rate_limited: bool,
}

/// Forecast source backed by the Solcast rooftop API
pub struct SolcastSource {
    config: SolcastConfig,
    client: reqwest::Client,
    state: Mutex<CacheState>,
    logger: StructuredLogger,
}

impl SolcastSource {
    pub fn new(config: SolcastConfig) -> crate::error::Result<Self> {
        if config.resource_id.is_empty() || config.api_key.is_empty() {
            return Err(crate::error::HelionError::config(
                "Solcast requires resource_id and api_key",
            ));
        }
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            config,
            client,
            state: Mutex::new(CacheState {
                memory: None,
                rate_limited: false,
            }),
            logger: get_logger("solcast"),
        })
    }

    /// Read the file cache, discarding entries past the maximum age.
    /// Any read or parse failure counts as a miss.
    async fn load_file_cache(&self) -> Option<(Forecast, DateTime<Utc>)> {
        let raw = match tokio::fs::read_to_string(&self.config.cache_file).await {
            Ok(raw) => raw,
            Err(e) => {
                self.logger.debug(&format!("File cache read failed: {}", e));
                return None;
            }
        };
        let cache: FileCache = match serde_json::from_str(&raw) {
            Ok(cache) => cache,
            Err(e) => {
                self.logger
                    .debug(&format!("File cache parse failed: {}", e));
                return None;
            }
        };

        let age = Utc::now() - cache.fetched_at;
        if age >= self.config.cache_max_age() {
            return None;
        }
        Some((
            Forecast {
                periods: cache.forecasts,
            },
            cache.fetched_at,
        ))
    }

    async fn write_file_cache(&self, forecast: &Forecast) {
        let cache = FileCache {
            fetched_at: Utc::now(),
            forecasts: forecast.periods.clone(),
        };
        let encoded = match serde_json::to_string(&cache) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.logger
                    .warn(&format!("Failed to encode forecast cache: {}", e));
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.config.cache_file, encoded).await {
            self.logger
                .warn(&format!("Failed to write forecast cache: {}", e));
        }
    }

    /// Fetch from the API, falling back to the file cache on rate limits
    async fn fetch_from_api(
        &self,
        state: &mut CacheState,
    ) -> std::result::Result<Forecast, ForecastError> {
        if state.rate_limited {
            if let Some((cached, _)) = self.load_file_cache().await {
                state.memory = Some((cached.clone(), Instant::now()));
                return Ok(cached);
            }
            return Err(ForecastError::not_available(
                "Rate limited for today and no valid cache available",
            ));
        }

        let url = format!(
            "{}/rooftop_sites/{}/forecasts?format=json",
            self.config.api_url, self.config.resource_id
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                ForecastError::not_available(format!("Failed to fetch forecast: {}", e))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            state.rate_limited = true;
            self.logger
                .warn("Solcast rate limit hit, latching onto file cache");
            if let Some((cached, _)) = self.load_file_cache().await {
                state.memory = Some((cached.clone(), Instant::now()));
                return Ok(cached);
            }
            return Err(ForecastError::not_available(
                "Rate limited (429) and no valid cache available",
            ));
        }
        if status != reqwest::StatusCode::OK {
            return Err(ForecastError::not_available(format!(
                "API returned status {}",
                status
            )));
        }

        let parsed: SolcastResponse = response.json().await.map_err(|e| {
            ForecastError::not_available(format!("Failed to fetch forecast: {}", e))
        })?;
        let forecast = Forecast {
            periods: parsed.forecasts,
        };

        state.memory = Some((forecast.clone(), Instant::now()));
        self.write_file_cache(&forecast).await;
        self.logger.debug(&format!(
            "Fetched {} forecast periods from Solcast",
            forecast.periods.len()
        ));
        Ok(forecast)
    }
}

#[async_trait::async_trait]
impl SolarForecast for SolcastSource {
    async fn forecast(&self) -> std::result::Result<Forecast, ForecastError> {
        let mut state = self.state.lock().await;

        if let Some((cached, fetched_at)) = &state.memory
            && fetched_at.elapsed() < self.config.cache_ttl()
        {
            return Ok(cached.clone());
        }

        if let Some((cached, fetched_at)) = self.load_file_cache().await {
            let age = (Utc::now() - fetched_at).to_std().unwrap_or_default();
            if age < self.config.cache_ttl() {
                state.memory = Some((cached.clone(), Instant::now()));
                return Ok(cached);
            }
            // Stale but usable file cache; prefer the API, keep it as fallback
            return match self.fetch_from_api(&mut state).await {
                Ok(fresh) => Ok(fresh),
                Err(e) => {
                    self.logger
                        .warn(&format!("API fetch failed, using stale file cache: {}", e));
                    Ok(cached)
                }
            };
        }

        match self.fetch_from_api(&mut state).await {
            Ok(fresh) => Ok(fresh),
            Err(e) => {
                self.logger.warn(&format!(
                    "Failed to fetch forecast and no cache available: {}",
                    e
                ));
                Err(ForecastError::not_available(
                    "Unable to fetch forecast and no valid cache available",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_body(estimate: f64) -> serde_json::Value {
        serde_json::json!({
            "forecasts": [
                {
                    "pv_estimate": estimate,
                    "pv_estimate10": estimate * 0.5,
                    "pv_estimate90": estimate * 1.5,
                    "period_end": "2026-06-15T10:00:00.0000000Z",
                    "period": "PT30M"
                },
                {
                    "pv_estimate": estimate + 0.5,
                    "pv_estimate10": estimate,
                    "pv_estimate90": estimate + 1.0,
                    "period_end": "2026-06-15T10:30:00.0000000Z",
                    "period": "PT30M"
                }
            ]
        })
    }

    fn config_for(server_url: &str, dir: &tempfile::TempDir) -> SolcastConfig {
        SolcastConfig {
            api_url: server_url.to_string(),
            resource_id: "site-1234".to_string(),
            api_key: "test-key".to_string(),
            cache_file: dir
                .path()
                .join(".solcast-cache.json")
                .to_string_lossy()
                .into_owned(),
            ..SolcastConfig::default()
        }
    }

    async fn write_cache(config: &SolcastConfig, estimate: f64, age: chrono::Duration) {
        let cache = FileCache {
            fetched_at: Utc::now() - age,
            forecasts: vec![ForecastPeriod {
                pv_estimate: estimate,
                pv_estimate10: estimate,
                pv_estimate90: estimate,
                period_end: "2026-06-15T10:00:00Z".parse().unwrap(),
                period: "PT30M".to_string(),
            }],
        };
        tokio::fs::write(&config.cache_file, serde_json::to_string(&cache).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetches_once_then_serves_memory_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rooftop_sites/site-1234/forecasts"))
            .and(query_param("format", "json"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body(2.5)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = SolcastSource::new(config_for(&server.uri(), &dir)).unwrap();

        let first = source.forecast().await.unwrap();
        let second = source.forecast().await.unwrap();
        assert_eq!(first.periods.len(), 2);
        assert_eq!(first, second);

        // File cache written alongside the fetch
        let raw = tokio::fs::read_to_string(dir.path().join(".solcast-cache.json"))
            .await
            .unwrap();
        assert!(raw.contains("pv_estimate"));
    }

    #[tokio::test]
    async fn test_fresh_file_cache_skips_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body(9.0)))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&server.uri(), &dir);
        write_cache(&config, 1.0, chrono::Duration::minutes(5)).await;

        let source = SolcastSource::new(config).unwrap();
        let result = source.forecast().await.unwrap();
        assert!((result.periods[0].pv_estimate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rate_limit_falls_back_to_stale_file_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&server.uri(), &dir);
        write_cache(&config, 1.0, chrono::Duration::minutes(90)).await;

        let source = SolcastSource::new(config).unwrap();
        let result = source.forecast().await.unwrap();
        assert!((result.periods[0].pv_estimate - 1.0).abs() < f64::EPSILON);

        // Latched: the next call serves the cache without touching the API
        let again = source.forecast().await.unwrap();
        assert_eq!(result, again);
    }

    #[tokio::test]
    async fn test_expired_file_cache_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body(2.5)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&server.uri(), &dir);
        write_cache(&config, 1.0, chrono::Duration::days(3)).await;

        let source = SolcastSource::new(config).unwrap();
        let result = source.forecast().await.unwrap();
        assert!((result.periods[0].pv_estimate - 2.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_api_failure_without_cache_is_not_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = SolcastSource::new(config_for(&server.uri(), &dir)).unwrap();
        let err = source.forecast().await.unwrap_err();
        assert!(err.to_string().contains("no valid cache available"));
    }

    #[test]
    fn test_requires_credentials() {
        assert!(SolcastSource::new(SolcastConfig::default()).is_err());
    }
}
