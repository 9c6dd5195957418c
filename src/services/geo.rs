//! Great-circle distance utilities.
//!
//! All distances are returned in kilometres. Coordinates are WGS84 degrees.

use geo::{Distance, Haversine, Point};

/// Haversine distance in km between two (lat, lon) pairs.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // geo points are (x = lon, y = lat)
    let a = Point::new(lon1, lat1);
    let b = Point::new(lon2, lat2);
    Haversine::distance(a, b) / 1000.0
}

/// Cumulative along-track distance for each coordinate, starting at 0.0.
///
/// The returned vector has the same length as the input; empty input yields
/// an empty vector.
pub fn cumulative_km(coords: &[(f64, f64)]) -> Vec<f64> {
    let mut cumulative = Vec::with_capacity(coords.len());
    let mut total = 0.0;
    for (i, &(lat, lon)) in coords.iter().enumerate() {
        if i > 0 {
            let (plat, plon) = coords[i - 1];
            total += haversine_km(plat, plon, lat, lon);
        }
        cumulative.push(total);
    }
    cumulative
}

/// Distances between consecutive coordinates (`len - 1` entries).
pub fn segment_km(coords: &[(f64, f64)]) -> Vec<f64> {
    coords
        .windows(2)
        .map(|w| haversine_km(w[0].0, w[0].1, w[1].0, w[1].1))
        .collect()
}

/// Diagonal offsets (degrees) probed around a point whose forecast fetch failed.
///
/// 0.01° of latitude is ~1.1 km, so these cover roughly 1.5 to 3 km away.
pub const FALLBACK_OFFSETS_DEG: [(f64, f64); 4] =
    [(0.01, 0.01), (-0.01, -0.01), (0.02, 0.02), (-0.02, -0.02)];

/// Coordinates to probe, in order, when the exact point cannot be served.
pub fn fallback_coordinates(lat: f64, lon: f64) -> Vec<(f64, f64)> {
    FALLBACK_OFFSETS_DEG
        .iter()
        .map(|(dlat, dlon)| (lat + dlat, lon + dlon))
        .collect()
}
