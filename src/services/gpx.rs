//! GPX trajectory parser.
//!
//! Decodes a GPX document into an ordered list of [`RawSample`]s:
//! - track points (`trk/trkseg/trkpt`), concatenated in document order across
//!   all tracks and segments, take priority;
//! - otherwise standalone waypoints (`wpt`);
//! - otherwise route points (`rte/rtept`).
//!
//! The reader is an explicit state machine: the element context is an enum
//! stack threaded through the quick-xml event loop, and the point currently
//! being assembled lives in a single builder.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::services::resample::{resample, ResampleResult};

/// Errors that can occur while reading a trajectory source.
#[derive(Debug, Error)]
pub enum GpxError {
    #[error("Access to GPX source denied: {0}")]
    AccessDenied(String),
    #[error("Malformed GPX document: {0}")]
    MalformedInput(String),
    #[error("No trajectory data found in GPX document")]
    NoTrajectoryData,
}

impl From<quick_xml::Error> for GpxError {
    fn from(err: quick_xml::Error) -> Self {
        GpxError::MalformedInput(err.to_string())
    }
}

/// A single geographic sample read from the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RawSample {
    /// Latitude (WGS84)
    pub latitude: f64,
    /// Longitude (WGS84)
    pub longitude: f64,
    /// Elevation in metres, when present and numeric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// Sample time, when present and valid ISO 8601
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Point name (`<name>`), when non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl RawSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
            timestamp: None,
            label: None,
        }
    }

    /// Exact coordinate equality (used for de-duplication).
    pub fn same_position(&self, other: &RawSample) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

/// Parse GPX bytes and resample the extracted samples at `spacing_km`.
pub fn parse_gpx(bytes: &[u8], file_name: &str, spacing_km: f64) -> Result<ResampleResult, GpxError> {
    let samples = parse_samples(bytes)?;
    let mut result = resample(&samples, spacing_km);
    result.file_name = file_name.to_string();

    tracing::info!(
        "Parsed '{}': {} samples, {:.2} km, {} route points at {} km spacing",
        file_name,
        result.point_count,
        result.distance,
        result.points.len(),
        spacing_km
    );

    Ok(result)
}

/// Parse GPX bytes into raw samples, applying the track > waypoint > route priority.
pub fn parse_samples(bytes: &[u8]) -> Result<Vec<RawSample>, GpxError> {
    let mut reader = Reader::from_reader(bytes);
    let mut collector = GpxCollector::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => collector.start(e)?,
            Event::Empty(ref e) => {
                collector.start(e)?;
                collector.end();
            }
            Event::End(_) => collector.end(),
            Event::Text(ref e) => {
                let text = e
                    .unescape()
                    .map_err(|err| GpxError::MalformedInput(err.to_string()))?;
                collector.text(&text);
            }
            Event::CData(ref e) => {
                let text = std::str::from_utf8(e)
                    .map_err(|err| GpxError::MalformedInput(err.to_string()))?;
                collector.text(text);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    collector.finish()
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointKind {
    Track,
    Route,
    Waypoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Elevation,
    Time,
    Name,
}

/// Element context, one entry per open element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Track,
    Segment,
    Route,
    Point(PointKind),
    Field(Field),
    Other,
}

#[derive(Debug)]
struct PointBuilder {
    lat: Option<f64>,
    lon: Option<f64>,
    elevation: String,
    time: String,
    name: String,
}

impl PointBuilder {
    fn new(e: &BytesStart) -> Self {
        let mut lat = None;
        let mut lon = None;
        for attr in e.attributes().flatten() {
            let key = local_name_str(attr.key.as_ref());
            let value = attr.unescape_value().unwrap_or_default();
            match key {
                "lat" => lat = parse_coordinate(&value, "lat", 90.0),
                "lon" => lon = parse_coordinate(&value, "lon", 180.0),
                _ => {}
            }
        }
        Self {
            lat,
            lon,
            elevation: String::new(),
            time: String::new(),
            name: String::new(),
        }
    }

    /// Finalize the point. Points without usable coordinates are dropped.
    fn build(self) -> Option<RawSample> {
        let (latitude, longitude) = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                tracing::warn!("Skipping GPX point without valid lat/lon");
                return None;
            }
        };

        let elevation = match self.elevation.trim() {
            "" => None,
            text => text.parse::<f64>().ok().filter(|v| v.is_finite()),
        };
        let timestamp = match self.time.trim() {
            "" => None,
            text => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
        };
        let label = Some(self.name.trim().to_string()).filter(|s| !s.is_empty());

        Some(RawSample {
            latitude,
            longitude,
            elevation,
            timestamp,
            label,
        })
    }
}

#[derive(Debug, Default)]
struct GpxCollector {
    stack: Vec<Context>,
    current: Option<PointBuilder>,
    saw_root: bool,
    track_points: Vec<RawSample>,
    waypoints: Vec<RawSample>,
    route_points: Vec<RawSample>,
}

impl GpxCollector {
    fn start(&mut self, e: &BytesStart) -> Result<(), GpxError> {
        if self.stack.is_empty() {
            if self.saw_root {
                return Err(GpxError::MalformedInput(
                    "more than one root element".to_string(),
                ));
            }
            self.saw_root = true;
        }

        let qname = e.name();
        let name = local_name_str(qname.as_ref());
        let parent = self.stack.last().copied();

        let context = match (name, parent) {
            (_, Some(Context::Field(_))) => Context::Other,
            ("ele", Some(Context::Point(_))) => Context::Field(Field::Elevation),
            ("time", Some(Context::Point(_))) => Context::Field(Field::Time),
            ("name", Some(Context::Point(_))) => Context::Field(Field::Name),
            (_, Some(Context::Point(_))) => Context::Other,
            ("trk", _) => Context::Track,
            ("trkseg", Some(Context::Track)) => Context::Segment,
            ("rte", _) => Context::Route,
            ("trkpt", Some(Context::Segment)) => self.open_point(PointKind::Track, e),
            ("rtept", Some(Context::Route)) => self.open_point(PointKind::Route, e),
            ("wpt", _) => self.open_point(PointKind::Waypoint, e),
            _ => Context::Other,
        };

        self.stack.push(context);
        Ok(())
    }

    fn open_point(&mut self, kind: PointKind, e: &BytesStart) -> Context {
        self.current = Some(PointBuilder::new(e));
        Context::Point(kind)
    }

    fn text(&mut self, text: &str) {
        let Some(Context::Field(field)) = self.stack.last().copied() else {
            return;
        };
        let Some(point) = self.current.as_mut() else {
            return;
        };
        let target = match field {
            Field::Elevation => &mut point.elevation,
            Field::Time => &mut point.time,
            Field::Name => &mut point.name,
        };
        target.push_str(text);
    }

    fn end(&mut self) {
        if let Some(Context::Point(kind)) = self.stack.pop() {
            let Some(sample) = self.current.take().and_then(PointBuilder::build) else {
                return;
            };
            match kind {
                PointKind::Track => self.track_points.push(sample),
                PointKind::Waypoint => self.waypoints.push(sample),
                PointKind::Route => self.route_points.push(sample),
            }
        }
    }

    fn finish(self) -> Result<Vec<RawSample>, GpxError> {
        if !self.saw_root {
            return Err(GpxError::MalformedInput(
                "document has no root element".to_string(),
            ));
        }
        if !self.stack.is_empty() {
            return Err(GpxError::MalformedInput(
                "unexpected end of document".to_string(),
            ));
        }

        let samples = if !self.track_points.is_empty() {
            self.track_points
        } else if !self.waypoints.is_empty() {
            self.waypoints
        } else {
            self.route_points
        };

        if samples.is_empty() {
            return Err(GpxError::NoTrajectoryData);
        }
        Ok(samples)
    }
}

fn parse_coordinate(value: &str, field: &str, limit: f64) -> Option<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v.abs() <= limit => Some(v),
        Ok(v) => {
            tracing::warn!("Out-of-range GPX {}='{}'", field, v);
            None
        }
        Err(e) => {
            tracing::warn!("Malformed GPX {}='{}': {}", field, value, e);
            None
        }
    }
}

/// Extract the local name from a potentially namespaced XML name.
/// e.g. `gpx:trkpt` -> `trkpt`, `trkpt` -> `trkpt`
fn local_name_str(full: &[u8]) -> &str {
    let s = std::str::from_utf8(full).unwrap_or("");
    match s.rfind(':') {
        Some(pos) => &s[pos + 1..],
        None => s,
    }
}
