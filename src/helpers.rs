//! Shared helpers for time arithmetic and coordinate formatting.
//!
//! - `floor_to_hour`: truncates a timestamp to the start of its hour (cache keys)
//! - `offset_by_fraction`: places an instant proportionally between two instants
//! - `format_coord`: fixed 6-decimal rendering used on the provider wire

use chrono::{DateTime, Duration, Timelike, Utc};

/// Floor a datetime to the start of its hour.
pub(crate) fn floor_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.time().hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

/// Return `start + fraction * (end - start)`, at millisecond resolution.
///
/// A non-finite fraction yields `start`.
pub(crate) fn offset_by_fraction(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    fraction: f64,
) -> DateTime<Utc> {
    if !fraction.is_finite() {
        tracing::warn!(
            "offset_by_fraction received non-finite fraction {}, using start time",
            fraction
        );
        return start;
    }
    let span_ms = (end - start).num_milliseconds() as f64;
    let offset_ms = (span_ms * fraction).round() as i64;
    start + Duration::milliseconds(offset_ms)
}

/// Render a coordinate with six decimal places (~0.1 m).
pub(crate) fn format_coord(v: f64) -> String {
    format!("{:.6}", v)
}
