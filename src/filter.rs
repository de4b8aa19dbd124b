use crate::config::ACCURACY_THRESHOLD_M;
use crate::location::LocationFix;
use crate::track::{coordinates_valid, TrackPoint};

/// Rejects coarse fixes and normalizes the rest into track points.
#[derive(Debug, Clone, Copy)]
pub struct SampleFilter {
    accuracy_threshold_m: f64,
}

impl SampleFilter {
    pub fn new(accuracy_threshold_m: f64) -> Self {
        Self {
            accuracy_threshold_m,
        }
    }

    pub fn accepts(&self, fix: &LocationFix) -> bool {
        // NaN accuracy compares false and would slip through a plain `>=`.
        fix.accuracy_m.is_finite()
            && fix.accuracy_m < self.accuracy_threshold_m
            && coordinates_valid(fix.latitude, fix.longitude)
    }

    /// Returns the track point for an accepted fix, `None` for a rejected one.
    pub fn apply(&self, fix: &LocationFix) -> Option<TrackPoint> {
        if !self.accepts(fix) {
            return None;
        }

        Some(TrackPoint {
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp_ms: fix.timestamp_ms,
            altitude_m: fix.altitude_m.filter(|a| a.is_finite()),
            speed_mps: fix.speed_mps.filter(|s| s.is_finite() && *s >= 0.0),
        })
    }
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self::new(ACCURACY_THRESHOLD_M)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_at_and_above_threshold() {
        let filter = SampleFilter::default();
        for accuracy in [100.0, 100.5, 250.0, f64::INFINITY, f64::NAN] {
            let fix = LocationFix::new(45.0, 7.0, accuracy, 0);
            assert!(filter.apply(&fix).is_none(), "accuracy {} accepted", accuracy);
        }
    }

    #[test]
    fn test_accepts_below_threshold() {
        let filter = SampleFilter::default();
        for accuracy in [0.0, 3.0, 99.99] {
            let fix = LocationFix::new(45.0, 7.0, accuracy, 1_000).with_altitude(120.0);
            let point = filter.apply(&fix).unwrap();
            assert_eq!(point.latitude, 45.0);
            assert_eq!(point.longitude, 7.0);
            assert_eq!(point.timestamp_ms, 1_000);
            assert_eq!(point.altitude_m, Some(120.0));
        }
    }

    #[test]
    fn test_speed_normalization() {
        let filter = SampleFilter::default();
        let base = LocationFix::new(45.0, 7.0, 5.0, 0);

        assert_eq!(filter.apply(&base.clone().with_speed(12.5)).unwrap().speed_mps, Some(12.5));
        assert_eq!(filter.apply(&base.clone().with_speed(0.0)).unwrap().speed_mps, Some(0.0));
        assert_eq!(filter.apply(&base.clone().with_speed(-1.0)).unwrap().speed_mps, None);
        assert_eq!(filter.apply(&base.clone().with_speed(f64::NAN)).unwrap().speed_mps, None);
        assert_eq!(filter.apply(&base).unwrap().speed_mps, None);
    }

    #[test]
    fn test_rejects_out_of_range_coordinates() {
        let filter = SampleFilter::default();
        let positions = [
            (95.0, 7.0),
            (-90.5, 7.0),
            (45.0, 200.0),
            (45.0, -180.1),
            (f64::NAN, 7.0),
        ];
        for (lat, lon) in positions {
            let fix = LocationFix::new(lat, lon, 5.0, 0);
            assert!(filter.apply(&fix).is_none(), "({}, {}) accepted", lat, lon);
        }
        assert!(filter.accepts(&LocationFix::new(90.0, -180.0, 5.0, 0)));
    }

    #[test]
    fn test_custom_threshold() {
        let filter = SampleFilter::new(20.0);
        assert!(!filter.accepts(&LocationFix::new(45.0, 7.0, 25.0, 0)));
        assert!(filter.accepts(&LocationFix::new(45.0, 7.0, 19.0, 0)));
    }
}
