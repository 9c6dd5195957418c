//! Pass-time estimation for representative points.
//!
//! Two entry points exist and are deliberately kept apart:
//! - `build_timed_route` spreads the total distance evenly over the points by
//!   index. Used when an existing trip is re-timed and only the ordinal
//!   position of each point is trusted.
//! - `build_timed_route_by_distance` uses the along-track distance of each
//!   point. Used on a fresh import where the resampler knows those distances.
//!
//! In both cases the pass time is proportional to the distance from start, the
//! first point is pinned to `start` and the last to `arrival` and `total_km`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::helpers::offset_by_fraction;
use crate::services::gpx::RawSample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoutePoint {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    /// km from the first point
    pub distance_from_start: f64,
    pub estimated_pass_time: DateTime<Utc>,
    /// 0-based position in the route
    pub segment_index: u32,
    /// km to the next point, 0 for the last one
    pub segment_distance: f64,
}

/// Anything with a WGS84 position that can be turned into a route point.
pub trait Positioned {
    fn position(&self) -> (f64, f64);
}

impl Positioned for RawSample {
    fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

impl Positioned for RoutePoint {
    fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// Index-proportional timing: point `i` of `k` sits at `total_km * i / (k - 1)`.
pub fn build_timed_route<P: Positioned>(
    points: &[P],
    start: DateTime<Utc>,
    arrival: DateTime<Utc>,
    total_km: f64,
) -> Vec<RoutePoint> {
    let distances = index_distances(points.len(), total_km);
    assign_times(points, &distances, start, arrival, total_km)
}

/// Geometry-proportional timing from known along-track distances.
///
/// `distances` must have one entry per point; otherwise this falls back to
/// index-proportional distances.
pub fn build_timed_route_by_distance<P: Positioned>(
    points: &[P],
    distances: &[f64],
    start: DateTime<Utc>,
    arrival: DateTime<Utc>,
    total_km: f64,
) -> Vec<RoutePoint> {
    if distances.len() != points.len() {
        tracing::warn!(
            "Got {} distances for {} points, falling back to index-proportional timing",
            distances.len(),
            points.len()
        );
        return build_timed_route(points, start, arrival, total_km);
    }
    assign_times(points, distances, start, arrival, total_km)
}

fn index_distances(k: usize, total_km: f64) -> Vec<f64> {
    if k < 2 {
        return vec![0.0; k];
    }
    let step = total_km / (k - 1) as f64;
    (0..k).map(|i| i as f64 * step).collect()
}

fn assign_times<P: Positioned>(
    points: &[P],
    distances: &[f64],
    start: DateTime<Utc>,
    arrival: DateTime<Utc>,
    total_km: f64,
) -> Vec<RoutePoint> {
    let k = points.len();
    let degenerate = !(total_km.is_finite() && total_km > 0.0);
    if degenerate && k > 0 {
        tracing::debug!("Route has no length ({} km), every point passes at start", total_km);
    }

    let mut route: Vec<RoutePoint> = points
        .iter()
        .zip(distances)
        .enumerate()
        .map(|(i, (p, &d))| {
            let (latitude, longitude) = p.position();
            let (distance_from_start, estimated_pass_time) = if i == 0 {
                (0.0, start)
            } else if degenerate {
                (d, start)
            } else {
                (d, offset_by_fraction(start, arrival, d / total_km))
            };
            RoutePoint {
                id: Uuid::new_v4(),
                latitude,
                longitude,
                distance_from_start,
                estimated_pass_time,
                segment_index: i as u32,
                segment_distance: 0.0,
            }
        })
        .collect();

    if k >= 2 {
        if let Some(last) = route.last_mut() {
            last.distance_from_start = if degenerate { 0.0 } else { total_km };
            last.estimated_pass_time = if degenerate { start } else { arrival };
        }
    }

    for i in 0..k.saturating_sub(1) {
        let next = route[i + 1].distance_from_start;
        route[i].segment_distance = (next - route[i].distance_from_start).max(0.0);
    }

    route
}
