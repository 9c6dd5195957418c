use std::time::Duration;

use crate::services::geocode::REVERSE_GEOCODING_URL;
use crate::services::openweather::{Units, ONE_CALL_URL};
use crate::services::weather::FetchPolicy;

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Provider key at startup; can be replaced through the settings endpoint.
    pub openweather_api_key: Option<String>,
    pub openweather_base_url: String,
    pub geocoding_base_url: String,
    pub units: Units,
    pub language: String,
    /// Spacing used when an import does not specify one (km).
    pub default_spacing_km: f64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Bounds connecting and each read; the full request is capped at twice this.
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub point_delay: Duration,
    /// At least one second
    pub reachability_interval: Duration,
    pub geocode_cache_max_entries: u64,
    pub geocode_cache_ttl: Duration,
}

/// Shortest allowed interval between reachability probes (s).
const MIN_REACHABILITY_SECS: u64 = 1;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", "8080")
                .parse()
                .expect("PORT must be a valid u16"),
            openweather_api_key: std::env::var("OPENWEATHER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            openweather_base_url: env_or("OPENWEATHER_BASE_URL", ONE_CALL_URL),
            geocoding_base_url: env_or("GEOCODING_BASE_URL", REVERSE_GEOCODING_URL),
            units: env_or("WEATHER_UNITS", "metric")
                .parse()
                .expect("WEATHER_UNITS must be 'metric' or 'imperial'"),
            language: env_or("WEATHER_LANGUAGE", "en"),
            default_spacing_km: env_or("DEFAULT_SPACING_KM", "10")
                .parse()
                .expect("DEFAULT_SPACING_KM must be a number"),
            max_retries: env_or("WEATHER_MAX_RETRIES", "3")
                .parse()
                .expect("WEATHER_MAX_RETRIES must be a valid u32"),
            retry_delay: Duration::from_millis(
                env_or("WEATHER_RETRY_DELAY_MS", "2000")
                    .parse()
                    .expect("WEATHER_RETRY_DELAY_MS must be a valid u64"),
            ),
            request_timeout: Duration::from_secs(
                env_or("WEATHER_REQUEST_TIMEOUT_SECS", "30")
                    .parse()
                    .expect("WEATHER_REQUEST_TIMEOUT_SECS must be a valid u64"),
            ),
            cache_ttl: Duration::from_secs(
                env_or("WEATHER_CACHE_TTL_SECS", "1800")
                    .parse()
                    .expect("WEATHER_CACHE_TTL_SECS must be a valid u64"),
            ),
            cache_max_entries: env_or("WEATHER_CACHE_MAX_ENTRIES", "100")
                .parse()
                .expect("WEATHER_CACHE_MAX_ENTRIES must be a valid usize"),
            point_delay: Duration::from_millis(
                env_or("WEATHER_POINT_DELAY_MS", "500")
                    .parse()
                    .expect("WEATHER_POINT_DELAY_MS must be a valid u64"),
            ),
            reachability_interval: Duration::from_secs(
                env_or("REACHABILITY_PROBE_SECS", "30")
                    .parse::<u64>()
                    .expect("REACHABILITY_PROBE_SECS must be a valid u64")
                    .max(MIN_REACHABILITY_SECS),
            ),
            geocode_cache_max_entries: env_or("GEOCODE_CACHE_MAX_ENTRIES", "1000")
                .parse()
                .expect("GEOCODE_CACHE_MAX_ENTRIES must be a valid u64"),
            geocode_cache_ttl: Duration::from_secs(
                env_or("GEOCODE_CACHE_TTL_SECS", "86400")
                    .parse()
                    .expect("GEOCODE_CACHE_TTL_SECS must be a valid u64"),
            ),
        }
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            point_delay: self.point_delay,
            cache_ttl: self.cache_ttl,
            cache_max_entries: self.cache_max_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        // NOTE: set_var/remove_var is not thread-safe; this is the only test
        // in the crate touching these variables.
        unsafe {
            for name in [
                "PORT",
                "OPENWEATHER_API_KEY",
                "OPENWEATHER_BASE_URL",
                "WEATHER_UNITS",
                "DEFAULT_SPACING_KM",
                "WEATHER_MAX_RETRIES",
                "WEATHER_RETRY_DELAY_MS",
                "WEATHER_CACHE_TTL_SECS",
                "GEOCODE_CACHE_MAX_ENTRIES",
            ] {
                std::env::remove_var(name);
            }
            std::env::set_var("REACHABILITY_PROBE_SECS", "0");
        }

        let config = AppConfig::from_env();

        assert_eq!(config.port, 8080);
        assert!(config.openweather_api_key.is_none());
        assert_eq!(config.openweather_base_url, ONE_CALL_URL);
        assert_eq!(config.units, Units::Metric);
        assert_eq!(config.default_spacing_km, 10.0);
        assert_eq!(config.geocode_cache_max_entries, 1000);
        // A zero interval would make the probe loop spin
        assert_eq!(config.reachability_interval, Duration::from_secs(1));

        let policy = config.fetch_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay, Duration::from_millis(2000));
        assert_eq!(policy.cache_ttl, Duration::from_secs(1800));
    }
}
