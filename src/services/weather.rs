//! Per-point weather fetching for a timed route.
//!
//! Single point:
//! - rejects early without an API key or while the provider is unreachable
//! - serves from the snapshot cache when the same coordinate and hour were
//!   fetched less than the TTL ago
//! - otherwise calls the provider with a bounded, fixed-delay retry and selects
//!   the bucket for the pass time
//!
//! Route batch: points are fetched one after another with a pause between
//! them. A failing point is retried at a few nearby coordinates and finally
//! replaced by a placeholder, so the batch always yields one snapshot per point.
//!
//! Reachability is tracked by a background TCP probe owned by this service.
//! Invalid-credential and reachability changes are published as `WeatherEvent`s.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::services::cache::{CacheKey, WeatherCache};
use crate::services::credentials::CredentialStore;
use crate::services::forecast::{select_forecast, WeatherSnapshot};
use crate::services::geo::fallback_coordinates;
use crate::services::geocode::PlaceNameResolver;
use crate::services::openweather::{OpenWeatherClient, WeatherError};
use crate::services::timing::RoutePoint;

/// Timeout of a single reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the event channel; slow subscribers lose the oldest events.
const EVENT_CAPACITY: usize = 16;

/// Retry, pacing and cache settings of the fetcher.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Total attempts per request (at least 1)
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Pause after each successful point in a batch
    pub point_delay: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            point_delay: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(1800),
            cache_max_entries: 100,
        }
    }
}

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeatherEvent {
    /// The provider rejected the configured API key.
    CredentialInvalidated,
    ReachabilityChanged { reachable: bool },
}

pub struct WeatherService {
    client: OpenWeatherClient,
    credentials: Arc<dyn CredentialStore>,
    places: Arc<dyn PlaceNameResolver>,
    policy: FetchPolicy,
    cache: Mutex<WeatherCache>,
    reachable: AtomicBool,
    events: broadcast::Sender<WeatherEvent>,
}

impl WeatherService {
    pub fn new(
        client: OpenWeatherClient,
        credentials: Arc<dyn CredentialStore>,
        places: Arc<dyn PlaceNameResolver>,
        policy: FetchPolicy,
    ) -> Self {
        let ttl = chrono::Duration::from_std(policy.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(1800));
        let cache = WeatherCache::new(ttl, policy.cache_max_entries);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            credentials,
            places,
            policy,
            cache: Mutex::new(cache),
            reachable: AtomicBool::new(true),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WeatherEvent> {
        self.events.subscribe()
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    pub fn has_api_key(&self) -> bool {
        self.credentials.api_key().is_some()
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
        tracing::info!("Weather cache cleared");
    }

    fn emit(&self, event: WeatherEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Single point
    // -----------------------------------------------------------------------

    /// Weather at `(lat, lon)` for `target`.
    pub async fn fetch_for_point(
        &self,
        lat: f64,
        lon: f64,
        target: DateTime<Utc>,
    ) -> Result<WeatherSnapshot, WeatherError> {
        self.fetch_for_point_until(lat, lon, target, &CancellationToken::new())
            .await
    }

    async fn fetch_for_point_until(
        &self,
        lat: f64,
        lon: f64,
        target: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let api_key = self.credentials.api_key().ok_or(WeatherError::NoApiKey)?;
        if !self.is_reachable() {
            return Err(WeatherError::NoConnection);
        }

        let key = CacheKey::new(lat, lon, target);
        if let Some(hit) = self.cache.lock().await.get(&key, Utc::now()) {
            tracing::debug!("Weather cache hit for ({:.4}, {:.4}) at {}", lat, lon, target);
            return Ok(hit);
        }

        let client = &self.client;
        let key_str = api_key.as_str();
        let result = self
            .with_retry(cancel, move || async move {
                let response = client.fetch_one_call(lat, lon, key_str).await?;
                select_forecast(target, &response)
            })
            .await;

        let data = match result {
            Ok(data) => data,
            Err(WeatherError::InvalidApiKey) => {
                tracing::error!("Weather provider rejected the API key");
                self.emit(WeatherEvent::CredentialInvalidated);
                return Err(WeatherError::InvalidApiKey);
            }
            Err(e) => return Err(e),
        };

        let place_name = self.places.resolve(lat, lon).await;
        let snapshot = WeatherSnapshot::from_forecast(lat, lon, target, data, place_name);

        self.cache
            .lock()
            .await
            .insert(key, snapshot.clone(), Utc::now());
        Ok(snapshot)
    }

    /// Run `op` up to `max_retries` times with a fixed delay, stopping early on
    /// non-retryable errors or cancellation.
    async fn with_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, WeatherError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WeatherError>>,
    {
        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(WeatherError::Cancelled);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Attempt {}/{} failed: {}, retrying in {:?}",
                        attempt,
                        attempts,
                        e,
                        self.policy.retry_delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(WeatherError::Cancelled),
                        _ = tokio::time::sleep(self.policy.retry_delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Route batch
    // -----------------------------------------------------------------------

    /// One snapshot per route point, in input order.
    pub async fn fetch_for_route(&self, points: &[RoutePoint]) -> Vec<WeatherSnapshot> {
        match self
            .fetch_for_route_until(points, &CancellationToken::new())
            .await
        {
            Ok(snapshots) => snapshots,
            // Only reachable through cancellation, which a fresh token never signals
            Err(_) => points
                .iter()
                .map(|p| WeatherSnapshot::placeholder(p.latitude, p.longitude, p.estimated_pass_time))
                .collect(),
        }
    }

    /// Like `fetch_for_route`, but stops between points and between retry
    /// attempts once `cancel` fires.
    pub async fn fetch_for_route_until(
        &self,
        points: &[RoutePoint],
        cancel: &CancellationToken,
    ) -> Result<Vec<WeatherSnapshot>, WeatherError> {
        let started = std::time::Instant::now();
        let mut snapshots = Vec::with_capacity(points.len());
        let mut degraded = 0usize;

        tracing::info!("Fetching weather for {} route points", points.len());

        for (i, point) in points.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Weather batch cancelled after {}/{} points", i, points.len());
                return Err(WeatherError::Cancelled);
            }

            let target = point.estimated_pass_time;
            match self
                .fetch_for_point_until(point.latitude, point.longitude, target, cancel)
                .await
            {
                Ok(snapshot) => {
                    snapshots.push(snapshot);
                    if i + 1 < points.len() && !self.policy.point_delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(WeatherError::Cancelled),
                            _ = tokio::time::sleep(self.policy.point_delay) => {}
                        }
                    }
                }
                Err(WeatherError::Cancelled) => return Err(WeatherError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        "Weather for point {} ({:.4}, {:.4}) failed: {}",
                        i,
                        point.latitude,
                        point.longitude,
                        e
                    );
                    let snapshot = self.fallback_for_point(point, &e, cancel).await?;
                    if snapshot.is_placeholder() {
                        degraded += 1;
                    }
                    snapshots.push(snapshot);
                }
            }
        }

        tracing::info!(
            "Weather batch done: {} points, {} placeholders, took {}ms",
            snapshots.len(),
            degraded,
            started.elapsed().as_millis()
        );
        Ok(snapshots)
    }

    /// Probe nearby coordinates; the result keeps the original coordinates.
    async fn fallback_for_point(
        &self,
        point: &RoutePoint,
        cause: &WeatherError,
        cancel: &CancellationToken,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let target = point.estimated_pass_time;
        let placeholder =
            || WeatherSnapshot::placeholder(point.latitude, point.longitude, target);

        // Another coordinate cannot fix a missing or rejected key or a dead link
        if matches!(
            cause,
            WeatherError::NoApiKey | WeatherError::InvalidApiKey | WeatherError::NoConnection
        ) {
            return Ok(placeholder());
        }

        for (n, (lat, lon)) in fallback_coordinates(point.latitude, point.longitude)
            .into_iter()
            .enumerate()
        {
            match self.fetch_for_point_until(lat, lon, target, cancel).await {
                Ok(mut snapshot) => {
                    tracing::info!(
                        "Fallback probe {} ({:.4}, {:.4}) succeeded for point {}",
                        n + 1,
                        lat,
                        lon,
                        point.segment_index
                    );
                    snapshot.latitude = point.latitude;
                    snapshot.longitude = point.longitude;
                    return Ok(snapshot);
                }
                Err(WeatherError::Cancelled) => return Err(WeatherError::Cancelled),
                Err(e) => {
                    tracing::debug!("Fallback probe {} ({:.4}, {:.4}) failed: {}", n + 1, lat, lon, e);
                }
            }
        }

        tracing::warn!(
            "No weather for point {} after all fallback probes, using placeholder",
            point.segment_index
        );
        Ok(placeholder())
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    /// Probe the provider once and update the reachability flag.
    pub async fn refresh_reachability(&self) -> bool {
        let reachable = match self.client.probe_address() {
            Some(addr) => matches!(
                tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(&addr)).await,
                Ok(Ok(_))
            ),
            None => {
                tracing::warn!("Cannot derive a probe address from the provider URL");
                true
            }
        };
        let previous = self.reachable.swap(reachable, Ordering::Relaxed);
        if previous != reachable {
            if reachable {
                tracing::info!("Weather provider reachable again");
            } else {
                tracing::warn!("Weather provider unreachable");
            }
            self.emit(WeatherEvent::ReachabilityChanged { reachable });
        }
        reachable
    }

    /// Probe every `interval` until `cancel` fires.
    pub fn spawn_reachability_monitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("Reachability monitor started (every {:?})", interval);
            loop {
                service.refresh_reachability().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::info!("Reachability monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::InMemoryCredentialStore;
    use crate::services::geocode::CoordinateLabels;
    use crate::services::openweather::Units;
    use chrono::Duration as ChronoDuration;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn fast_policy() -> FetchPolicy {
        FetchPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(5),
            point_delay: Duration::ZERO,
            ..FetchPolicy::default()
        }
    }

    fn service_with(base_url: &str, key: Option<&str>, policy: FetchPolicy) -> WeatherService {
        WeatherService::new(
            OpenWeatherClient::new(base_url, Units::Metric, "en", Duration::from_secs(2)),
            Arc::new(InMemoryCredentialStore::new(key.map(str::to_string))),
            Arc::new(CoordinateLabels),
            policy,
        )
    }

    fn service(server: &MockServer, key: Option<&str>) -> WeatherService {
        service_with(&server.uri(), key, fast_policy())
    }

    fn forecast_body() -> serde_json::Value {
        let base = at("2026-05-01T08:00:00Z").timestamp();
        let hourly: Vec<serde_json::Value> = (0..12)
            .map(|h| {
                serde_json::json!({
                    "dt": base + h * 3600,
                    "temp": 12.0 + h as f64,
                    "humidity": 60,
                    "wind_speed": 5.0,
                    "wind_deg": 180,
                    "weather": [{ "description": "scattered clouds", "icon": "03d" }],
                    "pop": 0.2
                })
            })
            .collect();
        serde_json::json!({ "hourly": hourly })
    }

    fn route(lats: &[f64]) -> Vec<RoutePoint> {
        lats.iter()
            .enumerate()
            .map(|(i, &lat)| RoutePoint {
                id: Uuid::new_v4(),
                latitude: lat,
                longitude: 4.0,
                distance_from_start: i as f64 * 10.0,
                estimated_pass_time: at("2026-05-01T10:00:00Z") + ChronoDuration::minutes(20 * i as i64),
                segment_index: i as u32,
                segment_distance: 10.0,
            })
            .collect()
    }

    async fn mount_ok(server: &MockServer) {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_selects_bucket_for_target() {
        let server = MockServer::start().await;
        mount_ok(&server).await;
        let weather = service(&server, Some("k"));

        let snap = assert_ok!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:30:00Z")).await);
        // First bucket at or after 10:30 is 11:00, the fourth one
        assert_eq!(snap.temperature, 15.0);
        assert_eq!(snap.timestamp, at("2026-05-01T10:30:00Z"));
        assert_eq!(snap.place_name, "50.00°, 4.00°");
    }

    #[tokio::test]
    async fn test_second_fetch_same_hour_hits_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(1)
            .mount(&server)
            .await;
        let weather = service(&server, Some("k"));

        let first = assert_ok!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:05:00Z")).await);
        let second = assert_ok!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:55:00Z")).await);
        assert_eq!(first.id, second.id);
        assert_eq!(first, second);
        assert_eq!(weather.cached_entries().await, 1);
    }

    #[tokio::test]
    async fn test_without_key_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(0)
            .mount(&server)
            .await;
        let weather = service(&server, None);

        let err = assert_err!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:00:00Z")).await);
        assert!(matches!(err, WeatherError::NoApiKey));
    }

    #[tokio::test]
    async fn test_invalid_key_not_retried_and_announced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        let weather = service(&server, Some("bad"));
        let mut events = weather.subscribe();

        let err = assert_err!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:00:00Z")).await);
        assert!(matches!(err, WeatherError::InvalidApiKey));
        assert_eq!(assert_ok!(events.try_recv()), WeatherEvent::CredentialInvalidated);
    }

    #[tokio::test]
    async fn test_rate_limit_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;
        let weather = service(&server, Some("k"));

        let err = assert_err!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:00:00Z")).await);
        assert!(matches!(err, WeatherError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn test_server_error_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        mount_ok(&server).await;
        let weather = service(&server, Some("k"));

        assert_ok!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:00:00Z")).await);
    }

    #[tokio::test]
    async fn test_server_error_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;
        let weather = service(&server, Some("k"));

        let err = assert_err!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:00:00Z")).await);
        assert!(matches!(err, WeatherError::Server(500)));
        assert_eq!(weather.cached_entries().await, 0);
    }

    #[tokio::test]
    async fn test_empty_response_is_no_data_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(3)
            .mount(&server)
            .await;
        let weather = service(&server, Some("k"));

        let err = assert_err!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:00:00Z")).await);
        assert!(matches!(err, WeatherError::NoData));
    }

    #[tokio::test]
    async fn test_unreachable_provider_rejects_early() {
        // Reserve a port, then free it so nothing listens there
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let weather = service_with(
            &format!("http://127.0.0.1:{}/data/3.0/onecall", port),
            Some("k"),
            fast_policy(),
        );
        let mut events = weather.subscribe();

        assert!(!weather.refresh_reachability().await);
        assert!(!weather.is_reachable());
        assert_eq!(
            assert_ok!(events.try_recv()),
            WeatherEvent::ReachabilityChanged { reachable: false }
        );

        let err = assert_err!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:00:00Z")).await);
        assert!(matches!(err, WeatherError::NoConnection));
    }

    #[tokio::test]
    async fn test_reachable_provider_stays_reachable() {
        let server = MockServer::start().await;
        let weather = service(&server, Some("k"));
        let mut events = weather.subscribe();
        assert!(weather.refresh_reachability().await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_substitutes_placeholder_for_failing_point() {
        let server = MockServer::start().await;
        // Point 3 and every fallback probe around it fail
        for lat in ["50.200000", "50.210000", "50.190000", "50.220000", "50.180000"] {
            Mock::given(method("GET"))
                .and(query_param("lat", lat))
                .respond_with(ResponseTemplate::new(500))
                .with_priority(1)
                .expect(3)
                .mount(&server)
                .await;
        }
        mount_ok(&server).await;
        let weather = service(&server, Some("k"));

        let points = route(&[50.0, 50.1, 50.2, 50.3, 50.4]);
        let snapshots = weather.fetch_for_route(&points).await;

        assert_eq!(snapshots.len(), 5);
        for (i, (snap, point)) in snapshots.iter().zip(&points).enumerate() {
            assert_eq!(snap.latitude, point.latitude);
            assert_eq!(snap.timestamp, point.estimated_pass_time);
            assert_eq!(snap.is_placeholder(), i == 2, "point {}", i);
        }
    }

    #[tokio::test]
    async fn test_batch_uses_first_successful_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("lat", "50.000000"))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&server)
            .await;
        mount_ok(&server).await;
        let weather = service(&server, Some("k"));

        let points = route(&[50.0]);
        let snapshots = weather.fetch_for_route(&points).await;
        assert_eq!(snapshots.len(), 1);
        assert!(!snapshots[0].is_placeholder());
        assert_eq!(snapshots[0].latitude, 50.0);
        assert_eq!(snapshots[0].longitude, 4.0);
        // Named after the probe coordinate
        assert_eq!(snapshots[0].place_name, "50.01°, 4.01°");
    }

    #[tokio::test]
    async fn test_batch_without_key_is_all_placeholders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(0)
            .mount(&server)
            .await;
        let weather = service(&server, None);

        let snapshots = weather.fetch_for_route(&route(&[50.0, 50.1, 50.2])).await;
        assert_eq!(snapshots.len(), 3);
        assert!(snapshots.iter().all(|s| s.is_placeholder()));
    }

    #[tokio::test]
    async fn test_cancelled_batch_issues_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(0)
            .mount(&server)
            .await;
        let weather = service(&server, Some("k"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = assert_err!(weather.fetch_for_route_until(&route(&[50.0, 50.1]), &cancel).await);
        assert!(matches!(err, WeatherError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_during_retry_delay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let policy = FetchPolicy {
            retry_delay: Duration::from_secs(30),
            ..fast_policy()
        };
        let weather = Arc::new(service_with(&server.uri(), Some("k"), policy));
        let cancel = CancellationToken::new();

        let task = {
            let weather = Arc::clone(&weather);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                weather
                    .fetch_for_route_until(&route(&[50.0]), &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(WeatherError::Cancelled)));
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let server = MockServer::start().await;
        mount_ok(&server).await;
        let weather = service(&server, Some("k"));
        assert_ok!(weather.fetch_for_point(50.0, 4.0, at("2026-05-01T10:00:00Z")).await);
        assert_eq!(weather.cached_entries().await, 1);
        weather.clear_cache().await;
        assert_eq!(weather.cached_entries().await, 0);
    }

    #[tokio::test]
    async fn test_batch_mixed_outcomes_keep_input_order() {
        let server = MockServer::start().await;
        // Point 1 is fetched once up front and then served from the cache
        Mock::given(method("GET"))
            .and(query_param("lat", "50.000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        // Point 3 fails at its own coordinate, the first fallback coordinate answers
        Mock::given(method("GET"))
            .and(query_param("lat", "50.200000"))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .expect(3)
            .mount(&server)
            .await;
        // Point 4 fails everywhere
        for lat in ["50.300000", "50.310000", "50.290000", "50.320000", "50.280000"] {
            Mock::given(method("GET"))
                .and(query_param("lat", lat))
                .respond_with(ResponseTemplate::new(503))
                .with_priority(1)
                .expect(3)
                .mount(&server)
                .await;
        }
        mount_ok(&server).await;
        let weather = service(&server, Some("k"));

        let points = route(&[50.0, 50.1, 50.2, 50.3]);
        let cached = assert_ok!(
            weather
                .fetch_for_point(50.0, 4.0, points[0].estimated_pass_time)
                .await
        );

        let snapshots = weather.fetch_for_route(&points).await;

        assert_eq!(snapshots.len(), points.len());
        for (snap, point) in snapshots.iter().zip(&points) {
            assert_eq!(snap.latitude, point.latitude);
            assert_eq!(snap.longitude, point.longitude);
            assert_eq!(snap.timestamp, point.estimated_pass_time);
        }
        assert_eq!(snapshots[0].id, cached.id);
        assert!(!snapshots[1].is_placeholder());
        assert!(!snapshots[2].is_placeholder());
        assert_eq!(snapshots[2].place_name, "50.21°, 4.01°");
        assert!(snapshots[3].is_placeholder());
    }

    #[tokio::test]
    async fn test_reachability_monitor_stops_on_cancel() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let weather = Arc::new(service_with(
            &format!("http://127.0.0.1:{}/data/3.0/onecall", port),
            Some("k"),
            fast_policy(),
        ));
        let mut events = weather.subscribe();
        let cancel = CancellationToken::new();

        let monitor = weather.spawn_reachability_monitor(Duration::from_millis(20), cancel.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();

        assert_ok!(
            tokio::time::timeout(Duration::from_secs(5), monitor)
                .await
                .unwrap()
        );
        // The loop dropped its handle on the service
        assert_eq!(Arc::strong_count(&weather), 1);
        assert!(!weather.is_reachable());
        // Several rounds ran, but only the change was announced
        assert_eq!(
            assert_ok!(events.try_recv()),
            WeatherEvent::ReachabilityChanged { reachable: false }
        );
        assert!(events.try_recv().is_err());
    }
}
