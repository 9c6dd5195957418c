//! Distance-based resampling of a dense trajectory.
//!
//! `resample` is a pure function of `(raw_samples, spacing_km)`: calling it
//! again with the same inputs reproduces the same result, which is what makes
//! interactive re-spacing (`reresample`) restartable.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::geo::{cumulative_km, segment_km};
use crate::services::gpx::RawSample;

/// Representative points of a trajectory, plus everything needed to redo the
/// reduction at another spacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResampleResult {
    /// Source file name (empty when the samples did not come from a file)
    #[serde(default)]
    pub file_name: String,
    /// Total distance in km over ALL raw samples; the authoritative trip distance
    pub distance: f64,
    /// Number of raw samples
    pub point_count: usize,
    /// Kept samples, in original order
    pub points: Vec<RawSample>,
    /// Great-circle distance in km between consecutive kept samples
    pub segment_distances: Vec<f64>,
    /// Along-track distance in km of each kept sample from the first raw sample
    #[serde(default)]
    pub point_distances: Vec<f64>,
    /// Target spacing in km used to produce `points`
    pub spacing_km: f64,
    /// All raw samples, retained for re-resampling
    pub raw_samples: Vec<RawSample>,
}

/// Reduce `samples` to points spaced roughly `spacing_km` apart along the track.
///
/// The first and last samples are always kept. For each multiple of the
/// spacing up to the total length, the interior sample whose cumulative
/// distance is closest to that target is kept, unless a sample at the exact
/// same position was already kept.
///
/// Runs in O(samples) regardless of how many targets the spacing produces.
pub fn resample(samples: &[RawSample], spacing_km: f64) -> ResampleResult {
    let coords: Vec<(f64, f64)> = samples.iter().map(|s| (s.latitude, s.longitude)).collect();
    let cumulative = cumulative_km(&coords);
    let total = cumulative.last().copied().unwrap_or(0.0);

    let kept = select_indices(samples, &cumulative, total, spacing_km);

    let points: Vec<RawSample> = kept.iter().map(|&i| samples[i].clone()).collect();
    let kept_coords: Vec<(f64, f64)> = kept.iter().map(|&i| coords[i]).collect();
    let point_distances: Vec<f64> = kept.iter().map(|&i| cumulative[i]).collect();

    tracing::debug!(
        "Resampled {} samples ({:.3} km) at {} km spacing into {} points",
        samples.len(),
        total,
        spacing_km,
        points.len()
    );

    ResampleResult {
        file_name: String::new(),
        distance: total,
        point_count: samples.len(),
        points,
        segment_distances: segment_km(&kept_coords),
        point_distances,
        spacing_km,
        raw_samples: samples.to_vec(),
    }
}

/// Redo the reduction of an existing result at a new spacing.
///
/// Only `raw_samples` (and the file name) of `existing` are consulted.
pub fn reresample(existing: &ResampleResult, new_spacing_km: f64) -> ResampleResult {
    tracing::info!(
        "Re-resampling '{}' ({} raw samples) from {} km to {} km spacing",
        existing.file_name,
        existing.raw_samples.len(),
        existing.spacing_km,
        new_spacing_km
    );
    let mut result = resample(&existing.raw_samples, new_spacing_km);
    result.file_name = existing.file_name.clone();
    result
}

fn select_indices(
    samples: &[RawSample],
    cumulative: &[f64],
    total: f64,
    spacing_km: f64,
) -> Vec<usize> {
    let n = samples.len();
    if n <= 1 {
        return (0..n).collect();
    }
    let last = n - 1;

    if !spacing_km.is_finite() || spacing_km <= 0.0 {
        tracing::warn!(
            "Invalid spacing {} km, keeping only first and last samples",
            spacing_km
        );
        return vec![0, last];
    }
    // Without interior samples every target resolves to an endpoint
    if spacing_km >= total || n == 2 {
        return vec![0, last];
    }

    let mut kept = vec![0];
    let mut seen = HashSet::from([position_key(&samples[0])]);

    // Interior candidates are `1..last`. Targets only grow, so the candidates
    // closest to a target are always `lower` (earliest index of the largest
    // distance below it) and `upper` (first index at or beyond it).
    let steps = (total / spacing_km).floor() as u64;
    let mut lower: Option<usize> = None;
    let mut upper = 1;
    let mut i: u64 = 1;
    while i <= steps {
        let target = i as f64 * spacing_km;
        while upper < last && cumulative[upper] < target {
            if lower.map_or(true, |l| cumulative[l] != cumulative[upper]) {
                lower = Some(upper);
            }
            upper += 1;
        }
        let has_upper = upper < last;

        // Ties keep the earlier index
        let best = match lower {
            Some(l) if !has_upper || target - cumulative[l] <= cumulative[upper] - target => l,
            _ => upper,
        };
        if seen.insert(position_key(&samples[best])) {
            kept.push(best);
        }

        // Targets before the next boundary resolve to `best` again
        let boundary = match lower {
            Some(_) if !has_upper => break,
            Some(l) if best == l => (cumulative[l] + cumulative[upper]) / 2.0,
            _ => cumulative[upper],
        };
        let Some(next) = i.checked_add(1) else { break };
        i = next.max((boundary / spacing_km).floor() as u64);
    }

    if !kept.contains(&last) {
        kept.push(last);
    }
    kept
}

/// Exact position, with -0.0 folded into 0.0 to match `==`.
fn position_key(sample: &RawSample) -> (u64, u64) {
    ((sample.latitude + 0.0).to_bits(), (sample.longitude + 0.0).to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Degrees of latitude per km on the haversine sphere (R = 6371.0088 km).
    const DEG_PER_KM: f64 = 1.0 / 111.195_08;

    /// Samples due north of (50, 4), one per entry of `km_marks`.
    fn meridian_track(km_marks: &[f64]) -> Vec<RawSample> {
        km_marks
            .iter()
            .map(|km| RawSample::new(50.0 + km * DEG_PER_KM, 4.0))
            .collect()
    }

    #[test]
    fn test_three_legs_of_ten_km_yield_four_points() {
        let track = meridian_track(&[0.0, 10.0, 20.0, 30.0]);
        let result = resample(&track, 10.0);
        assert!((result.distance - 30.0).abs() < 0.01, "total {}", result.distance);
        assert_eq!(result.points.len(), 4);
        assert_eq!(result.points, track);
        assert_eq!(result.segment_distances.len(), 3);
        for (d, expected) in result.point_distances.iter().zip([0.0, 10.0, 20.0, 30.0]) {
            assert!((d - expected).abs() < 0.01);
        }
    }

    #[test]
    fn test_dense_track_picks_closest_samples() {
        let marks: Vec<f64> = (0..=95).map(|i| i as f64).collect();
        let track = meridian_track(&marks);
        let result = resample(&track, 10.0);
        assert_eq!(result.points.len(), 11);
        assert_eq!(result.point_count, 96);
        for (i, d) in result.point_distances.iter().take(10).enumerate() {
            assert!((d - i as f64 * 10.0).abs() < 0.01, "point {} at {}", i, d);
        }
        assert!((result.point_distances[10] - 95.0).abs() < 0.01);
    }

    #[test]
    fn test_spacing_at_least_total_keeps_first_and_last() {
        let track = meridian_track(&[0.0, 3.0, 7.0, 12.0]);
        for spacing in [12.5, 50.0, 1_000.0] {
            let result = resample(&track, spacing);
            assert_eq!(result.points, vec![track[0].clone(), track[3].clone()]);
        }
    }

    #[test]
    fn test_spacing_equal_to_total_keeps_first_and_last() {
        let track = meridian_track(&[0.0, 3.0, 7.0, 12.0]);
        let total = resample(&track, 1.0).distance;
        let result = resample(&track, total);
        assert_eq!(result.points.len(), 2);
    }

    #[test]
    fn test_single_sample_unchanged() {
        let track = vec![RawSample::new(50.0, 4.0)];
        let result = resample(&track, 10.0);
        assert_eq!(result.points, track);
        assert_eq!(result.distance, 0.0);
        assert!(result.segment_distances.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let result = resample(&[], 10.0);
        assert!(result.points.is_empty());
        assert_eq!(result.point_count, 0);
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn test_invalid_spacing_keeps_endpoints() {
        let track = meridian_track(&[0.0, 5.0, 10.0]);
        assert_eq!(resample(&track, 0.0).points.len(), 2);
        assert_eq!(resample(&track, -3.0).points.len(), 2);
        assert_eq!(resample(&track, f64::NAN).points.len(), 2);
    }

    #[test]
    fn test_loop_track_keeps_final_sample() {
        let mut track = meridian_track(&[0.0, 5.0, 10.0]);
        track.push(track[0].clone());
        let result = resample(&track, 5.0);
        assert_eq!(result.points.first(), track.first());
        assert_eq!(result.points.last(), track.last());
    }

    #[test]
    fn test_duplicate_positions_not_kept_twice() {
        // A stop: three samples at the same place around the 10 km mark.
        let track = meridian_track(&[0.0, 9.9, 9.9, 9.9, 20.0]);
        let result = resample(&track, 5.0);
        let at_stop = result
            .points
            .iter()
            .filter(|p| p.same_position(&track[1]))
            .count();
        assert_eq!(at_stop, 1);
    }

    #[test]
    fn test_deterministic() {
        let marks: Vec<f64> = (0..50).map(|i| (i as f64) * 0.7).collect();
        let track = meridian_track(&marks);
        assert_eq!(resample(&track, 3.3), resample(&track, 3.3));
    }

    #[test]
    fn test_total_distance_independent_of_spacing() {
        let marks: Vec<f64> = (0..50).map(|i| (i as f64) * 0.7).collect();
        let track = meridian_track(&marks);
        let reference = resample(&track, 1.0).distance;
        for spacing in [0.5, 2.0, 5.0, 30.0, 100.0] {
            assert_eq!(resample(&track, spacing).distance, reference);
        }
    }

    /// Straightforward scan over every target, kept as the reference.
    fn reference_indices(samples: &[RawSample], spacing_km: f64) -> Vec<usize> {
        let coords: Vec<(f64, f64)> = samples.iter().map(|s| (s.latitude, s.longitude)).collect();
        let cum = cumulative_km(&coords);
        let total = *cum.last().unwrap();
        let last = samples.len() - 1;
        if spacing_km >= total || samples.len() == 2 {
            return vec![0, last];
        }
        let mut kept = vec![0];
        for i in 1..=(total / spacing_km).floor() as usize {
            let target = i as f64 * spacing_km;
            let mut best = 1;
            for j in 1..last {
                if (cum[j] - target).abs() < (cum[best] - target).abs() {
                    best = j;
                }
            }
            if !kept.iter().any(|&k| samples[k].same_position(&samples[best])) {
                kept.push(best);
            }
        }
        if !kept.contains(&last) {
            kept.push(last);
        }
        kept
    }

    #[test]
    fn test_matches_full_scan_on_irregular_tracks() {
        let tracks = [
            meridian_track(&[0.0, 0.4, 0.4, 0.4, 3.1, 3.2, 7.9, 8.0, 8.0, 15.5, 16.0, 16.2, 30.0]),
            meridian_track(&[0.0, 5.0, 5.0, 10.0, 15.0, 15.0, 20.0]),
            meridian_track(&(0..80).map(|i| ((i * i) % 97) as f64 * 0.1 + i as f64).collect::<Vec<_>>()),
        ];
        for track in &tracks {
            let coords: Vec<(f64, f64)> = track.iter().map(|s| (s.latitude, s.longitude)).collect();
            let cum = cumulative_km(&coords);
            let total = *cum.last().unwrap();
            for spacing in [0.1, 0.3, 0.5, 1.0, 2.5, 5.0, 7.0, 10.0] {
                assert_eq!(
                    select_indices(track, &cum, total, spacing),
                    reference_indices(track, spacing),
                    "spacing {}",
                    spacing
                );
            }
        }
    }

    #[test]
    fn test_long_back_and_forth_track_is_fast() {
        // Alternating antipodes: ~40 million km, ~400 million targets at 0.1 km.
        let track: Vec<RawSample> = (0..2000)
            .map(|i| RawSample::new(0.0, if i % 2 == 0 { 0.0 } else { 180.0 }))
            .collect();
        let started = std::time::Instant::now();
        let result = resample(&track, 0.1);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(result.points.len(), 3);
        assert_eq!(result.points.first(), track.first());
        assert_eq!(result.points.last(), track.last());
    }

    #[test]
    fn test_reresample_round_trip() {
        let marks: Vec<f64> = (0..=60).map(|i| i as f64 * 0.5).collect();
        let mut original = resample(&meridian_track(&marks), 5.0);
        original.file_name = "loop.gpx".to_string();

        let coarse = reresample(&original, 12.0);
        assert_eq!(coarse.spacing_km, 12.0);
        assert_ne!(coarse.points.len(), original.points.len());
        assert_eq!(coarse.file_name, "loop.gpx");

        let back = reresample(&coarse, 5.0);
        assert_eq!(back, original);
    }
}
