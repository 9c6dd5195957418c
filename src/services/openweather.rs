//! OpenWeather One Call 3.0 client.
//!
//! See: https://openweathermap.org/api/one-call-3

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::helpers::format_coord;
use crate::services::forecast::OneCallResponse;

pub const ONE_CALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

/// Sections of the One Call response we never use.
const EXCLUDE: &str = "daily,alerts,minutely";

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("No API key configured")]
    NoApiKey,

    #[error("No internet connection")]
    NoConnection,

    #[error("Timeout while fetching weather data")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Too many API calls, try again later")]
    RateLimitExceeded,

    #[error("Weather service server error: HTTP {0}")]
    Server(u16),

    #[error("Weather service error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Error decoding weather data: {0}")]
    Decoding(String),

    #[error("No weather data available")]
    NoData,

    #[error("Invalid URL for weather API: {0}")]
    InvalidUrl(String),

    #[error("Weather fetch cancelled")]
    Cancelled,
}

impl WeatherError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WeatherError::NoApiKey
                | WeatherError::InvalidApiKey
                | WeatherError::RateLimitExceeded
                | WeatherError::InvalidUrl(_)
                | WeatherError::Cancelled
        )
    }
}

impl From<reqwest::Error> for WeatherError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WeatherError::Timeout
        } else if err.is_decode() {
            WeatherError::Decoding(err.to_string())
        } else {
            WeatherError::Network(err.to_string())
        }
    }
}

/// Unit system requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            other => Err(format!("unknown unit system '{}'", other)),
        }
    }
}

/// Client for the One Call endpoint.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    base_url: String,
    units: Units,
    language: String,
}

impl OpenWeatherClient {
    /// `request_timeout` bounds connecting and each wait for response data;
    /// the whole exchange is capped at twice that.
    pub fn new(base_url: &str, units: Units, language: &str, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .read_timeout(request_timeout)
            .timeout(request_timeout * 2)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.to_string(),
            units,
            language: language.to_string(),
        }
    }

    /// `host:port` of the provider, for connectivity probes.
    pub fn probe_address(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.base_url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(format!("{}:{}", host, port))
    }

    /// Build the request URL for a coordinate.
    pub fn one_call_url(
        &self,
        lat: f64,
        lon: f64,
        api_key: &str,
    ) -> Result<reqwest::Url, WeatherError> {
        reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("lat", format_coord(lat)),
                ("lon", format_coord(lon)),
                ("appid", api_key.to_string()),
                ("units", self.units.as_str().to_string()),
                ("lang", self.language.clone()),
                ("exclude", EXCLUDE.to_string()),
                ("mode", "json".to_string()),
            ],
        )
        .map_err(|e| WeatherError::InvalidUrl(format!("{}: {}", self.base_url, e)))
    }

    /// Perform a single One Call request. No retries happen here.
    pub async fn fetch_one_call(
        &self,
        lat: f64,
        lon: f64,
        api_key: &str,
    ) -> Result<OneCallResponse, WeatherError> {
        let url = self.one_call_url(lat, lon, api_key)?;
        tracing::debug!("One Call request for ({:.4}, {:.4})", lat, lon);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        match status.as_u16() {
            200 => {}
            401 => return Err(WeatherError::InvalidApiKey),
            429 => return Err(WeatherError::RateLimitExceeded),
            code @ 500..=599 => return Err(WeatherError::Server(code)),
            code => {
                let message = response.text().await.unwrap_or_default();
                return Err(WeatherError::Api {
                    status: code,
                    message,
                });
            }
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<OneCallResponse>(&body)
            .map_err(|e| WeatherError::Decoding(e.to_string()))
    }
}
