//! Reverse geocoding of route points into human-readable place names.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use mini_moka::sync::Cache;
use serde::Deserialize;

use crate::services::credentials::CredentialStore;

pub const REVERSE_GEOCODING_URL: &str = "https://api.openweathermap.org/geo/1.0/reverse";

/// Resolve a coordinate to a place name. Never fails; implementations fall
/// back to a coordinate label.
pub trait PlaceNameResolver: Send + Sync {
    fn resolve(&self, lat: f64, lon: f64) -> BoxFuture<'_, String>;
}

/// "51.05°, 3.72°"
pub fn coordinate_label(lat: f64, lon: f64) -> String {
    format!("{:.2}°, {:.2}°", lat, lon)
}

fn cache_key(lat: f64, lon: f64) -> String {
    format!("{:.4},{:.4}", lat, lon)
}

/// Resolver that only labels coordinates, for running without a geocoder.
#[derive(Debug, Default, Clone)]
pub struct CoordinateLabels;

impl PlaceNameResolver for CoordinateLabels {
    fn resolve(&self, lat: f64, lon: f64) -> BoxFuture<'_, String> {
        Box::pin(async move { coordinate_label(lat, lon) })
    }
}

#[derive(Debug, Deserialize)]
struct GeoPlace {
    name: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

/// "locality, state, country", skipping missing parts.
fn format_place(place: &GeoPlace) -> Option<String> {
    let parts: Vec<&str> = [&place.name, &place.state, &place.country]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// OpenWeather reverse geocoding with a bounded, expiring name cache.
pub struct OpenWeatherGeocoder {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    cache: Cache<String, String>,
}

impl OpenWeatherGeocoder {
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialStore>,
        timeout: Duration,
        cache_size: u64,
        cache_ttl: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        let cache = Cache::builder()
            .max_capacity(cache_size)
            .time_to_live(cache_ttl)
            .build();
        Self {
            client,
            base_url: base_url.to_string(),
            credentials,
            cache,
        }
    }

    async fn lookup(&self, lat: f64, lon: f64, api_key: &str) -> Result<Option<String>, String> {
        let url = reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("lat", format!("{:.6}", lat)),
                ("lon", format!("{:.6}", lon)),
                ("limit", "1".to_string()),
                ("appid", api_key.to_string()),
            ],
        )
        .map_err(|e| format!("invalid geocoding URL: {}", e))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let places: Vec<GeoPlace> = response
            .json()
            .await
            .map_err(|e| format!("JSON parse error: {}", e))?;
        Ok(places.first().and_then(format_place))
    }
}

impl PlaceNameResolver for OpenWeatherGeocoder {
    fn resolve(&self, lat: f64, lon: f64) -> BoxFuture<'_, String> {
        Box::pin(async move {
            let key = cache_key(lat, lon);
            if let Some(name) = self.cache.get(&key) {
                return name;
            }

            let Some(api_key) = self.credentials.api_key() else {
                return coordinate_label(lat, lon);
            };

            let name = match self.lookup(lat, lon, &api_key).await {
                Ok(found) => found.unwrap_or_else(|| coordinate_label(lat, lon)),
                Err(e) => {
                    // Not cached, a later call may succeed
                    tracing::warn!("Reverse geocoding ({:.4}, {:.4}) failed: {}", lat, lon, e);
                    return coordinate_label(lat, lon);
                }
            };

            self.cache.insert(key, name.clone());
            name
        })
    }
}
