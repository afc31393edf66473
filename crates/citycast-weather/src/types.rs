use std::ops::RangeInclusive;

use citycast_core::NetworkError;
use serde::{Deserialize, Serialize};

/// Accepted temperature domain, in the configured unit system
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -50.0..=50.0;

/// Reason recorded for cities the provider does not know
pub const CITY_NOT_FOUND: &str = "City not found";

/// Validated weather for one city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub city: String,
    pub temperature: f64,
    pub description: String,
}

/// Soft per-city failure kept as output data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub city: String,
    pub error: String,
}

impl ErrorRecord {
    pub fn city_not_found(city: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            error: CITY_NOT_FOUND.to_string(),
        }
    }
}

/// One entry of a region bucket, as persisted and returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultRecord {
    Weather(WeatherRecord),
    Error(ErrorRecord),
}

impl ResultRecord {
    pub fn city(&self) -> &str {
        match self {
            ResultRecord::Weather(w) => &w.city,
            ResultRecord::Error(e) => &e.city,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResultRecord::Error(_))
    }
}

impl From<WeatherRecord> for ResultRecord {
    fn from(record: WeatherRecord) -> Self {
        ResultRecord::Weather(record)
    }
}

impl From<ErrorRecord> for ResultRecord {
    fn from(record: ErrorRecord) -> Self {
        ResultRecord::Error(record)
    }
}

/// Non-failing result of a single lookup
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(WeatherRecord),
    NotFound(ErrorRecord),
}

/// Weather lookup errors. Every variant fails the enclosing task.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(#[from] NetworkError),
    #[error("Provider returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Malformed provider response: {0}")]
    Parse(String),
    #[error("Invalid weather data: {0}")]
    InvalidData(String),
}

/// Check a record against the required fields and temperature domain.
///
/// # Errors
/// Returns `FetchError::InvalidData` describing the first violation.
pub fn validate_record(record: &WeatherRecord) -> Result<(), FetchError> {
    if record.city.trim().is_empty() {
        return Err(FetchError::InvalidData("missing city name".to_string()));
    }
    if record.description.trim().is_empty() {
        return Err(FetchError::InvalidData(format!(
            "missing description for {}",
            record.city
        )));
    }
    if !record.temperature.is_finite() || !TEMPERATURE_RANGE.contains(&record.temperature) {
        return Err(FetchError::InvalidData(format!(
            "temperature {} for {} outside {:?}",
            record.temperature, record.city, TEMPERATURE_RANGE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn record(temperature: f64) -> WeatherRecord {
        WeatherRecord {
            city: "Kyiv".to_string(),
            temperature,
            description: "light rain".to_string(),
        }
    }

    #[test]
    fn test_temperature_bounds_inclusive() {
        assert!(validate_record(&record(-50.0)).is_ok());
        assert!(validate_record(&record(50.0)).is_ok());
        assert!(validate_record(&record(0.0)).is_ok());
        assert!(matches!(
            validate_record(&record(50.1)),
            Err(FetchError::InvalidData(_))
        ));
        assert!(validate_record(&record(f64::NAN)).is_err());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut r = record(10.0);
        r.description = " ".to_string();
        assert!(validate_record(&r).is_err());

        let mut r = record(10.0);
        r.city.clear();
        assert!(validate_record(&r).is_err());
    }

    #[test]
    fn test_result_record_json_shapes() {
        let weather: ResultRecord = record(3.5).into();
        let json = serde_json::to_value(&weather).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"city": "Kyiv", "temperature": 3.5, "description": "light rain"})
        );

        let error: ResultRecord = ErrorRecord::city_not_found("Atlantis").into();
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json, serde_json::json!({"city": "Atlantis", "error": "City not found"}));
    }

    #[test]
    fn test_result_record_decodes_either_shape() {
        let records: Vec<ResultRecord> = serde_json::from_str(
            r#"[{"city": "Lima", "temperature": 21.0, "description": "clear sky"},
                {"city": "Atlantis", "error": "City not found"}]"#,
        )
        .unwrap();
        assert!(!records[0].is_error());
        assert!(records[1].is_error());
        assert_eq!(records[1].city(), "Atlantis");
    }
}
