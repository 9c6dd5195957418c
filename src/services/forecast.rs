//! Forecast selection from a One Call response.
//!
//! The provider returns an optional `current` bucket and an optional list of
//! `hourly` buckets. `select_forecast` turns that into the single data point
//! used for a route point passing at a given time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::openweather::WeatherError;

/// Description used when the provider sends no condition entry.
pub const UNKNOWN_DESCRIPTION: &str = "Unknown";
/// Icon used when the provider sends no condition entry, and for placeholders.
pub const UNKNOWN_ICON: &str = "questionmark.circle";
/// Description of a placeholder snapshot.
pub const NO_DATA_DESCRIPTION: &str = "No weather data available";
/// Place name of a placeholder snapshot.
pub const UNKNOWN_PLACE: &str = "Unknown location";

// --- One Call JSON response types ---

#[derive(Debug, Clone, Deserialize)]
pub struct OneCallResponse {
    #[serde(default)]
    pub current: Option<CurrentConditions>,
    #[serde(default)]
    pub hourly: Option<Vec<HourlyForecast>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentConditions {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub dt: DateTime<Utc>,
    pub temp: f64,
    /// Percent, 0..100
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_deg: f64,
    #[serde(default)]
    pub weather: Vec<Condition>,
    #[serde(default)]
    pub pop: Option<f64>,
    #[serde(default)]
    pub rain: Option<RainVolume>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HourlyForecast {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub dt: DateTime<Utc>,
    pub temp: f64,
    /// Percent, 0..100
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_deg: f64,
    #[serde(default)]
    pub weather: Vec<Condition>,
    /// Probability of precipitation, 0..1
    #[serde(default)]
    pub pop: f64,
    #[serde(default)]
    pub rain: Option<RainVolume>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RainVolume {
    #[serde(rename = "1h", default)]
    pub one_hour: Option<f64>,
}

/// Normalised weather values of one forecast bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherDataPoint {
    /// Bucket time
    pub valid_at: DateTime<Utc>,
    pub temperature: f64,
    /// 0..1
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    /// 0..1
    pub chance_of_rain: f64,
    /// mm in the hour
    pub rain_amount: f64,
    pub description: String,
    pub icon: String,
}

fn condition_fields(weather: &[Condition]) -> (String, String) {
    match weather.first() {
        Some(c) => (c.description.clone(), c.icon.clone()),
        None => (UNKNOWN_DESCRIPTION.to_string(), UNKNOWN_ICON.to_string()),
    }
}

impl From<&CurrentConditions> for WeatherDataPoint {
    fn from(c: &CurrentConditions) -> Self {
        let (description, icon) = condition_fields(&c.weather);
        Self {
            valid_at: c.dt,
            temperature: c.temp,
            humidity: c.humidity / 100.0,
            wind_speed: c.wind_speed,
            wind_direction: c.wind_deg,
            chance_of_rain: c.pop.unwrap_or(0.0),
            rain_amount: c.rain.as_ref().and_then(|r| r.one_hour).unwrap_or(0.0),
            description,
            icon,
        }
    }
}

impl From<&HourlyForecast> for WeatherDataPoint {
    fn from(h: &HourlyForecast) -> Self {
        let (description, icon) = condition_fields(&h.weather);
        Self {
            valid_at: h.dt,
            temperature: h.temp,
            humidity: h.humidity / 100.0,
            wind_speed: h.wind_speed,
            wind_direction: h.wind_deg,
            chance_of_rain: h.pop,
            rain_amount: h.rain.as_ref().and_then(|r| r.one_hour).unwrap_or(0.0),
            description,
            icon,
        }
    }
}

/// Pick the forecast for `target`.
///
/// 1. the first hourly bucket at or after `target`
/// 2. otherwise the last hourly bucket, even though it lies in the past
/// 3. otherwise the current conditions
/// 4. otherwise `WeatherError::NoData`
pub fn select_forecast(
    target: DateTime<Utc>,
    response: &OneCallResponse,
) -> Result<WeatherDataPoint, WeatherError> {
    if let Some(hourly) = response.hourly.as_deref().filter(|h| !h.is_empty()) {
        if let Some(bucket) = hourly.iter().find(|h| h.dt >= target) {
            return Ok(bucket.into());
        }
        if let Some(last) = hourly.last() {
            tracing::debug!(
                "No hourly bucket at or after {}, using last bucket at {}",
                target,
                last.dt
            );
            return Ok(last.into());
        }
    }

    match &response.current {
        Some(current) => {
            tracing::debug!("No hourly buckets, using current conditions for {}", target);
            Ok(current.into())
        }
        None => Err(WeatherError::NoData),
    }
}

/// Weather materialised for one route point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WeatherSnapshot {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    /// 0..1
    pub humidity: f64,
    pub wind_speed: f64,
    /// Degrees, meteorological (direction the wind comes from)
    pub wind_direction: f64,
    /// 0..1
    pub chance_of_rain: f64,
    /// mm in the hour
    pub rain_amount: f64,
    pub description: String,
    pub icon: String,
    /// Time the forecast was requested for
    pub timestamp: DateTime<Utc>,
    pub place_name: String,
}

impl WeatherSnapshot {
    pub fn from_forecast(
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
        data: WeatherDataPoint,
        place_name: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            latitude,
            longitude,
            temperature: data.temperature,
            humidity: data.humidity,
            wind_speed: data.wind_speed,
            wind_direction: data.wind_direction,
            chance_of_rain: data.chance_of_rain,
            rain_amount: data.rain_amount,
            description: data.description,
            icon: data.icon,
            timestamp,
            place_name,
        }
    }

    /// "No data" sentinel substituted when every fetch for a point failed.
    pub fn placeholder(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            latitude,
            longitude,
            temperature: 0.0,
            humidity: 0.0,
            wind_speed: 0.0,
            wind_direction: 0.0,
            chance_of_rain: 0.0,
            rain_amount: 0.0,
            description: NO_DATA_DESCRIPTION.to_string(),
            icon: UNKNOWN_ICON.to_string(),
            timestamp,
            place_name: UNKNOWN_PLACE.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.description == NO_DATA_DESCRIPTION && self.icon == UNKNOWN_ICON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn hourly_json(ts: &[&str]) -> serde_json::Value {
        let buckets: Vec<serde_json::Value> = ts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                serde_json::json!({
                    "dt": at(t).timestamp(),
                    "temp": 10.0 + i as f64,
                    "humidity": 80,
                    "wind_speed": 4.5,
                    "wind_deg": 270,
                    "weather": [{ "description": format!("bucket {}", i), "icon": "10d" }],
                    "pop": 0.4,
                    "rain": { "1h": 0.7 }
                })
            })
            .collect();
        serde_json::Value::Array(buckets)
    }

    fn current_json() -> serde_json::Value {
        serde_json::json!({
            "dt": at("2026-05-01T08:12:00Z").timestamp(),
            "temp": 3.5,
            "humidity": 55,
            "wind_speed": 1.0,
            "wind_deg": 90,
            "weather": [{ "description": "clear sky", "icon": "01d" }]
        })
    }

    fn response(value: serde_json::Value) -> OneCallResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_first_bucket_at_or_after_target() {
        let resp = response(serde_json::json!({
            "current": current_json(),
            "hourly": hourly_json(&["2026-05-01T09:00:00Z", "2026-05-01T10:00:00Z", "2026-05-01T11:00:00Z"])
        }));
        let point = select_forecast(at("2026-05-01T09:10:00Z"), &resp).unwrap();
        assert_eq!(point.valid_at, at("2026-05-01T10:00:00Z"));
        assert_eq!(point.description, "bucket 1");

        // Exact match counts as "at or after", earlier bucket is never preferred
        let point = select_forecast(at("2026-05-01T10:00:00Z"), &resp).unwrap();
        assert_eq!(point.valid_at, at("2026-05-01T10:00:00Z"));
    }

    #[test]
    fn test_target_after_all_buckets_uses_last() {
        let resp = response(serde_json::json!({
            "hourly": hourly_json(&["2026-05-01T09:00:00Z", "2026-05-01T10:00:00Z"])
        }));
        let point = select_forecast(at("2026-05-03T00:00:00Z"), &resp).unwrap();
        assert_eq!(point.valid_at, at("2026-05-01T10:00:00Z"));
    }

    #[test]
    fn test_empty_hourly_falls_back_to_current() {
        let resp = response(serde_json::json!({ "current": current_json(), "hourly": [] }));
        let point = select_forecast(at("2026-05-01T09:00:00Z"), &resp).unwrap();
        assert_eq!(point.description, "clear sky");
        assert_eq!(point.chance_of_rain, 0.0);
        assert_eq!(point.rain_amount, 0.0);
    }

    #[test]
    fn test_nothing_usable_is_no_data() {
        let resp = response(serde_json::json!({ "lat": 50.0, "lon": 4.0 }));
        let err = select_forecast(at("2026-05-01T09:00:00Z"), &resp).unwrap_err();
        assert!(matches!(err, WeatherError::NoData));
    }

    #[test]
    fn test_bucket_values_are_normalised() {
        let resp = response(serde_json::json!({
            "hourly": hourly_json(&["2026-05-01T09:00:00Z"])
        }));
        let point = select_forecast(at("2026-05-01T08:00:00Z"), &resp).unwrap();
        assert!((point.humidity - 0.8).abs() < 1e-12);
        assert_eq!(point.wind_direction, 270.0);
        assert_eq!(point.chance_of_rain, 0.4);
        assert_eq!(point.rain_amount, 0.7);
        assert_eq!(point.icon, "10d");
    }

    #[test]
    fn test_missing_condition_uses_unknown() {
        let resp = response(serde_json::json!({
            "hourly": [{
                "dt": at("2026-05-01T09:00:00Z").timestamp(),
                "temp": 1.0, "humidity": 10, "wind_speed": 0.0, "wind_deg": 0,
                "weather": [], "pop": 0.0
            }]
        }));
        let point = select_forecast(at("2026-05-01T09:00:00Z"), &resp).unwrap();
        assert_eq!(point.description, UNKNOWN_DESCRIPTION);
        assert_eq!(point.icon, UNKNOWN_ICON);
    }

    #[test]
    fn test_placeholder_snapshot() {
        let ts = at("2026-05-01T09:00:00Z");
        let snap = WeatherSnapshot::placeholder(50.0, 4.0, ts);
        assert!(snap.is_placeholder());
        assert_eq!(snap.place_name, UNKNOWN_PLACE);
        assert_eq!(snap.temperature, 0.0);
        assert_eq!(snap.timestamp, ts);
    }

    #[test]
    fn test_snapshot_from_forecast_keeps_target_time() {
        let resp = response(serde_json::json!({
            "hourly": hourly_json(&["2026-05-01T10:00:00Z"])
        }));
        let target = at("2026-05-01T09:40:00Z");
        let data = select_forecast(target, &resp).unwrap();
        let snap = WeatherSnapshot::from_forecast(50.0, 4.0, target, data, "Gent".to_string());
        assert_eq!(snap.timestamp, target);
        assert_eq!(snap.temperature, 10.0);
        assert!(!snap.is_placeholder());
    }

    #[test]
    fn test_bucket_without_pop_means_no_rain_chance() {
        let resp = response(serde_json::json!({
            "hourly": [{
                "dt": at("2026-05-01T09:00:00Z").timestamp(),
                "temp": 12.0, "humidity": 40, "wind_speed": 2.0, "wind_deg": 45,
                "weather": [{ "description": "few clouds", "icon": "02d" }]
            }]
        }));
        let point = select_forecast(at("2026-05-01T09:00:00Z"), &resp).unwrap();
        assert_eq!(point.chance_of_rain, 0.0);
        assert_eq!(point.description, "few clouds");
    }
}
