use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

/// True when the pair is a real WGS84 position. NaN fails both ranges.
pub fn coordinates_valid(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

/// Accepted, filtered fix stored as part of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Milliseconds since the Unix epoch
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    #[serde(rename = "altitude", default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(rename = "speed", default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

impl TrackPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
            altitude_m: None,
            speed_mps: None,
        }
    }

    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = Some(altitude_m);
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    fn as_geo(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    /// Great-circle distance in meters
    pub fn distance_to(&self, other: &TrackPoint) -> f64 {
        self.as_geo().haversine_distance(&other.as_geo())
    }
}

/// User-flagged waypoint attached to a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    /// Session-local sequence number, used to patch the name once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Route summary for display
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackStats {
    pub point_count: usize,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub average_speed_mps: f64,
    pub max_speed_mps: Option<f64>,
}

impl TrackStats {
    pub fn from_points(points: &[TrackPoint]) -> Self {
        let distance_meters: f64 = points.windows(2).map(|w| w[0].distance_to(&w[1])).sum();

        // Device clocks can jump backwards; never report a negative duration.
        let duration_seconds = match (points.first(), points.last()) {
            (Some(first), Some(last)) => {
                ((last.timestamp_ms - first.timestamp_ms).max(0)) as f64 / 1000.0
            }
            _ => 0.0,
        };

        let average_speed_mps = if duration_seconds > 0.0 {
            distance_meters / duration_seconds
        } else {
            0.0
        };

        let max_speed_mps = points
            .iter()
            .filter_map(|p| p.speed_mps)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |m| m.max(s))));

        TrackStats {
            point_count: points.len(),
            distance_meters,
            duration_seconds,
            average_speed_mps,
            max_speed_mps,
        }
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }
}
