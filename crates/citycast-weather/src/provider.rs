//! OpenWeatherMap current-weather client.

use std::sync::Arc;
use std::time::Duration;

use citycast_core::{ConfigError, ProviderConfig, ReqwestErrorExt, RetrySettings};
use citycast_geo::CanonicalCity;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::retry::{with_retry, RetryConfig};
use crate::types::{validate_record, ErrorRecord, FetchError, FetchOutcome, WeatherRecord};

#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Arc<Client>,
    api_url: Url,
    api_key: String,
    units: String,
    retry: RetryConfig,
}

impl WeatherProvider {
    /// Build a provider from configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingSetting` without an API key and
    /// `ConfigError::Invalid` for a bad URL or HTTP client setup.
    pub fn from_config(config: &ProviderConfig, retry: &RetrySettings) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingSetting("provider.api_key".to_string()))?;

        Self::new(
            &config.api_url,
            api_key,
            &config.units,
            Duration::from_secs(config.request_timeout_secs),
            RetryConfig::from(retry),
        )
    }

    /// # Errors
    /// Returns `ConfigError::Invalid` if `api_url` does not parse or the
    /// HTTP client cannot be built.
    pub fn new(
        api_url: &str,
        api_key: impl Into<String>,
        units: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, ConfigError> {
        let api_url = Url::parse(api_url)
            .map_err(|e| ConfigError::Invalid(format!("provider.api_url: {}", e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
            api_url,
            api_key: api_key.into(),
            units: units.into(),
            retry,
        })
    }

    /// Look up current weather for one city.
    ///
    /// A 404 from the provider is the only soft outcome; everything else that
    /// is not a valid record is an error.
    ///
    /// # Errors
    /// `Transport` for network failures, `Status` for other non-success
    /// responses, `Parse` for non-JSON bodies and `InvalidData` for payloads
    /// that are missing fields or out of range.
    #[instrument(skip(self, city), fields(city = %city), level = "debug")]
    pub async fn fetch(&self, city: &CanonicalCity) -> Result<FetchOutcome, FetchError> {
        let response = with_retry(&self.retry, || {
            self.client
                .get(self.api_url.clone())
                .query(&[
                    ("q", city.as_str()),
                    ("appid", self.api_key.as_str()),
                    ("units", self.units.as_str()),
                ])
                .send()
        })
        .await
        .map_err(|e| FetchError::Transport(e.into_network_error()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::warn!("City {} not found by provider", city);
            return Ok(FetchOutcome::NotFound(ErrorRecord::city_not_found(
                city.as_str(),
            )));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!("Provider error for {}: {} {}", city, status, message);
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("{}: {}", city, e)))?;

        let record = extract_record(&body)?;
        validate_record(&record)?;

        tracing::debug!("Fetched weather for {}: {}", city, record.temperature);
        Ok(FetchOutcome::Found(record))
    }
}

/// Pull `name`, `main.temp` and `weather[0].description` out of the body
fn extract_record(body: &Value) -> Result<WeatherRecord, FetchError> {
    let missing = |field: &str| FetchError::InvalidData(format!("missing field `{}`", field));

    let city = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("name"))?;
    let temperature = body
        .pointer("/main/temp")
        .and_then(Value::as_f64)
        .ok_or_else(|| missing("main.temp"))?;
    let description = body
        .pointer("/weather/0/description")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("weather[0].description"))?;

    Ok(WeatherRecord {
        city: city.to_string(),
        temperature,
        description: description.to_string(),
    })
}
