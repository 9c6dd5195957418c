//! Trip aggregate and its store.
//!
//! A trip owns its timed route points and the weather snapshots fetched for
//! them. Snapshots are linked to points by proximity, not by id.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::forecast::WeatherSnapshot;
use crate::services::geo::haversine_km;
use crate::services::resample::ResampleResult;
use crate::services::timing::{build_timed_route, build_timed_route_by_distance, RoutePoint};

/// A snapshot belongs to a route point when it lies within this distance.
const WEATHER_MATCH_RADIUS_KM: f64 = 1.0;

/// Moving start or arrival by more than this invalidates fetched weather.
const RETIME_TOLERANCE_SECS: i64 = 60;

/// Below this temperature (°C) a trip counts as cold.
pub const COLD_THRESHOLD_C: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Trip {
    pub id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    /// Total route length in km
    pub distance_km: f64,
    pub gpx_file_name: String,
    pub route_points: Vec<RoutePoint>,
    pub weather: Vec<WeatherSnapshot>,
    /// Highlight points whose weather breaks the rain rule
    #[serde(default)]
    pub rain_focus_enabled: bool,
    /// Bumped whenever pass times or points change. Weather is only stored
    /// against the revision it was fetched for.
    #[serde(default)]
    pub timing_revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// New trip from a freshly resampled route, timed by along-track distance.
    pub fn from_route(
        name: &str,
        route: &ResampleResult,
        start: DateTime<Utc>,
        arrival: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            start_time: start,
            arrival_time: arrival,
            distance_km: route.distance,
            gpx_file_name: route.file_name.clone(),
            route_points: build_timed_route_by_distance(
                &route.points,
                &route.point_distances,
                start,
                arrival,
                route.distance,
            ),
            weather: Vec::new(),
            rain_focus_enabled: false,
            timing_revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn duration(&self) -> Duration {
        self.arrival_time - self.start_time
    }

    /// km/h, 0 when the trip has no positive duration.
    pub fn average_speed_kmh(&self) -> f64 {
        let secs = self.duration().num_seconds();
        if secs <= 0 {
            return 0.0;
        }
        self.distance_km / (secs as f64 / 3600.0)
    }

    /// New start and arrival. Points are re-timed by index; weather is dropped
    /// when either time moves by more than a minute.
    ///
    /// Returns whether weather was cleared.
    pub fn retime(&mut self, start: DateTime<Utc>, arrival: DateTime<Utc>) -> bool {
        let moved = (start - self.start_time).num_seconds().abs() > RETIME_TOLERANCE_SECS
            || (arrival - self.arrival_time).num_seconds().abs() > RETIME_TOLERANCE_SECS;

        let mut ordered = self.route_points.clone();
        ordered.sort_by_key(|p| p.segment_index);
        self.route_points = build_timed_route(&ordered, start, arrival, self.distance_km);
        self.start_time = start;
        self.arrival_time = arrival;
        self.timing_revision += 1;

        let cleared = moved && !self.weather.is_empty();
        if cleared {
            tracing::info!("Trip {} moved in time, clearing {} snapshots", self.id, self.weather.len());
            self.weather.clear();
        }
        cleared
    }

    /// Swap in a new route, keeping id, timing and weather.
    pub fn replace_route(&mut self, route: &ResampleResult) {
        self.distance_km = route.distance;
        self.gpx_file_name = route.file_name.clone();
        self.route_points = build_timed_route_by_distance(
            &route.points,
            &route.point_distances,
            self.start_time,
            self.arrival_time,
            route.distance,
        );
        self.timing_revision += 1;
    }

    /// First snapshot within 1 km of `point`.
    pub fn weather_for_point(&self, point: &RoutePoint) -> Option<&WeatherSnapshot> {
        self.weather.iter().find(|w| {
            haversine_km(point.latitude, point.longitude, w.latitude, w.longitude)
                <= WEATHER_MATCH_RADIUS_KM
        })
    }

    /// Whether the point's linked weather should be highlighted.
    pub fn rain_highlight(&self, point: &RoutePoint, rule: &RainRule) -> bool {
        self.rain_focus_enabled
            && self
                .weather_for_point(point)
                .is_some_and(|w| !w.is_placeholder() && rule.is_rainy(w))
    }

    /// Overall verdict over the real (non-placeholder) snapshots.
    pub fn weather_assessment(&self, rule: &RainRule) -> Option<WeatherAssessment> {
        let real: Vec<&WeatherSnapshot> =
            self.weather.iter().filter(|w| !w.is_placeholder()).collect();
        if real.is_empty() {
            return None;
        }

        let chance = rule.chance_threshold_pct / 100.0;
        let high_chance = real.iter().any(|w| w.chance_of_rain >= chance);
        let rainy = real.iter().any(|w| w.rain_amount >= rule.amount_threshold_mm);
        let cold = real.iter().any(|w| w.temperature < COLD_THRESHOLD_C);

        let bad = match rule.rule {
            RainRuleType::Both => high_chance && rainy,
            RainRuleType::ChanceOnly => high_chance,
            RainRuleType::AmountOnly => rainy,
        };

        Some(if bad {
            WeatherAssessment::Rain
        } else if cold {
            WeatherAssessment::Cold
        } else {
            WeatherAssessment::Good
        })
    }
}

/// Which rain signals make a trip rainy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RainRuleType {
    #[default]
    Both,
    ChanceOnly,
    AmountOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RainRule {
    #[serde(default)]
    pub rule: RainRuleType,
    /// Percent, 0..100
    #[serde(default = "default_chance_threshold")]
    pub chance_threshold_pct: f64,
    /// mm per hour
    #[serde(default = "default_amount_threshold")]
    pub amount_threshold_mm: f64,
}

impl RainRule {
    /// Single-snapshot verdict.
    pub fn is_rainy(&self, snapshot: &WeatherSnapshot) -> bool {
        let high_chance = snapshot.chance_of_rain >= self.chance_threshold_pct / 100.0;
        let rainy = snapshot.rain_amount >= self.amount_threshold_mm;
        match self.rule {
            RainRuleType::Both => high_chance && rainy,
            RainRuleType::ChanceOnly => high_chance,
            RainRuleType::AmountOnly => rainy,
        }
    }
}

fn default_chance_threshold() -> f64 {
    50.0
}

fn default_amount_threshold() -> f64 {
    0.3
}

impl Default for RainRule {
    fn default() -> Self {
        Self {
            rule: RainRuleType::Both,
            chance_threshold_pct: default_chance_threshold(),
            amount_threshold_mm: default_amount_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WeatherAssessment {
    Rain,
    Cold,
    Good,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Trip {0} not found")]
    NotFound(Uuid),

    #[error("Trip {0} already exists")]
    Duplicate(Uuid),

    #[error("Trip {0} changed while its weather was being fetched")]
    Conflict(Uuid),
}

/// Persistence of trips by stable id.
pub trait TripStore: Send + Sync {
    fn insert(&self, trip: Trip) -> BoxFuture<'_, Result<Trip, StoreError>>;
    /// Replace a stored trip; bumps `updated_at`.
    fn update(&self, trip: Trip) -> BoxFuture<'_, Result<Trip, StoreError>>;
    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Trip, StoreError>>;
    /// Newest first
    fn list(&self) -> BoxFuture<'_, Vec<Trip>>;
    fn delete(&self, id: Uuid) -> BoxFuture<'_, Result<(), StoreError>>;
    /// Store weather fetched for `revision`; `Conflict` when the trip was
    /// re-timed or re-routed since.
    fn replace_weather(
        &self,
        id: Uuid,
        revision: u64,
        weather: Vec<WeatherSnapshot>,
    ) -> BoxFuture<'_, Result<Trip, StoreError>>;
    fn clear_weather(&self, id: Uuid) -> BoxFuture<'_, Result<Trip, StoreError>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTripStore {
    trips: RwLock<HashMap<Uuid, Trip>>,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: Uuid, f: F) -> Result<Trip, StoreError>
    where
        F: FnOnce(&mut Trip) -> Result<(), StoreError> + Send,
    {
        let mut trips = self.trips.write().await;
        let trip = trips.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        f(trip)?;
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }
}

impl TripStore for InMemoryTripStore {
    fn insert(&self, trip: Trip) -> BoxFuture<'_, Result<Trip, StoreError>> {
        Box::pin(async move {
            let mut trips = self.trips.write().await;
            if trips.contains_key(&trip.id) {
                return Err(StoreError::Duplicate(trip.id));
            }
            trips.insert(trip.id, trip.clone());
            tracing::debug!("Stored trip {} ({} points)", trip.id, trip.route_points.len());
            Ok(trip)
        })
    }

    fn update(&self, trip: Trip) -> BoxFuture<'_, Result<Trip, StoreError>> {
        Box::pin(async move {
            let id = trip.id;
            self.modify(id, move |stored| {
                *stored = trip;
                Ok(())
            })
            .await
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Trip, StoreError>> {
        Box::pin(async move {
            self.trips
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound(id))
        })
    }

    fn list(&self) -> BoxFuture<'_, Vec<Trip>> {
        Box::pin(async move {
            let mut trips: Vec<Trip> = self.trips.read().await.values().cloned().collect();
            trips.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.name.cmp(&b.name)));
            trips
        })
    }

    fn delete(&self, id: Uuid) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.trips
                .write()
                .await
                .remove(&id)
                .map(|_| ())
                .ok_or(StoreError::NotFound(id))
        })
    }

    fn replace_weather(
        &self,
        id: Uuid,
        revision: u64,
        weather: Vec<WeatherSnapshot>,
    ) -> BoxFuture<'_, Result<Trip, StoreError>> {
        Box::pin(async move {
            self.modify(id, move |trip| {
                if trip.timing_revision != revision {
                    tracing::warn!(
                        "Discarding weather for trip {}: fetched for revision {}, now at {}",
                        id,
                        revision,
                        trip.timing_revision
                    );
                    return Err(StoreError::Conflict(id));
                }
                trip.weather = weather;
                Ok(())
            })
            .await
        })
    }

    fn clear_weather(&self, id: Uuid) -> BoxFuture<'_, Result<Trip, StoreError>> {
        Box::pin(async move {
            self.modify(id, |trip| {
                trip.weather.clear();
                Ok(())
            })
            .await
        })
    }
}
