//! Location acquisition.
//!
//! A [`LocationSource`] hands out one [`LocationStream`] per subscription. The
//! stream is a bounded channel; dropping it closes the channel, which is how a
//! producer learns it has been cancelled (it stops on the next send).

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::config::WatchOptions;

const STREAM_CAPACITY: usize = 100;

/// One raw reading from the positioning capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub speed_mps: Option<f64>,
    pub altitude_m: Option<f64>,
    pub timestamp_ms: i64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            speed_mps: None,
            altitude_m: None,
            timestamp_ms,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = Some(altitude_m);
        self
    }
}

/// Location acquisition failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unknown(String),
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LocationError::PermissionDenied => write!(f, "Location permission denied"),
            LocationError::PositionUnavailable => write!(f, "Location information is unavailable"),
            LocationError::Timeout => write!(f, "The request to get location timed out"),
            LocationError::Unknown(msg) => write!(f, "An unknown location error occurred: {}", msg),
        }
    }
}

impl std::error::Error for LocationError {}

pub type LocationEvent = Result<LocationFix, LocationError>;

/// Receiving half of a location subscription. Dropping it cancels the subscription.
pub struct LocationStream {
    rx: mpsc::Receiver<LocationEvent>,
}

impl LocationStream {
    pub fn channel() -> (mpsc::Sender<LocationEvent>, LocationStream) {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        (tx, LocationStream { rx })
    }

    pub async fn next(&mut self) -> Option<LocationEvent> {
        self.rx.recv().await
    }
}

/// Device positioning capability
pub trait LocationSource: Send + Sync {
    /// Whether the device has a positioning capability at all.
    fn is_available(&self) -> bool;

    /// Begin continuous acquisition. Fails immediately when permission is denied.
    fn subscribe(&self, options: WatchOptions) -> Result<LocationStream, LocationError>;
}

#[derive(Default)]
struct FeedState {
    unavailable: bool,
    permission_denied: bool,
    sender: Option<mpsc::Sender<LocationEvent>>,
    subscriptions: usize,
}

/// Location source driven by pushing fixes through a [`LocationFeed`]
pub struct ChannelLocationSource {
    state: Arc<Mutex<FeedState>>,
}

/// Producer handle for a [`ChannelLocationSource`]
#[derive(Clone)]
pub struct LocationFeed {
    state: Arc<Mutex<FeedState>>,
}

impl ChannelLocationSource {
    pub fn new() -> (Self, LocationFeed) {
        let state = Arc::new(Mutex::new(FeedState::default()));
        (
            ChannelLocationSource {
                state: Arc::clone(&state),
            },
            LocationFeed { state },
        )
    }
}

impl LocationSource for ChannelLocationSource {
    fn is_available(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        !state.unavailable
    }

    fn subscribe(&self, _options: WatchOptions) -> Result<LocationStream, LocationError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.permission_denied {
            return Err(LocationError::PermissionDenied);
        }
        let (tx, stream) = LocationStream::channel();
        state.sender = Some(tx);
        state.subscriptions += 1;
        Ok(stream)
    }
}

impl LocationFeed {
    /// Deliver a fix. Returns false when nobody is subscribed.
    pub fn push_fix(&self, fix: LocationFix) -> bool {
        self.push(Ok(fix))
    }

    pub fn push_error(&self, error: LocationError) -> bool {
        self.push(Err(error))
    }

    fn push(&self, event: LocationEvent) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.sender.as_ref() {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// True while a subscriber holds the receiving end open.
    pub fn is_subscribed(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sender.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).subscriptions
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).unavailable = !available;
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).permission_denied = denied;
    }
}

/// Deterministic synthetic route, one fix per interval.
///
/// Heads north-east from the origin at roughly 15 m/s; every tenth fix is
/// degraded to 150 m accuracy so the sample filter has something to reject.
pub struct SimulatedLocationSource {
    origin: (f64, f64),
    fix_interval: Duration,
}

impl SimulatedLocationSource {
    pub fn new(origin_lat: f64, origin_lon: f64, fix_interval: Duration) -> Self {
        Self {
            origin: (origin_lat, origin_lon),
            fix_interval,
        }
    }
}

impl Default for SimulatedLocationSource {
    fn default() -> Self {
        Self::new(44.4949, 11.3426, Duration::from_secs(1))
    }
}

/// Fix number `seq` of the simulated route.
pub fn simulated_fix(origin: (f64, f64), seq: u64, timestamp_ms: i64) -> LocationFix {
    let step = seq as f64;
    let accuracy = if seq % 10 == 9 {
        150.0
    } else {
        5.0 + (step * 0.1).sin().abs() * 2.0
    };
    LocationFix::new(
        origin.0 + step * 0.0001,
        origin.1 + step * 0.0001,
        accuracy,
        timestamp_ms,
    )
    .with_speed(15.0 + (step * 0.5).sin() * 3.0)
    .with_altitude(50.0 + (step * 0.2).sin() * 4.0)
}

impl LocationSource for SimulatedLocationSource {
    fn is_available(&self) -> bool {
        true
    }

    fn subscribe(&self, _options: WatchOptions) -> Result<LocationStream, LocationError> {
        let (tx, stream) = LocationStream::channel();
        let origin = self.origin;
        let period = self.fix_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            let mut seq = 0u64;
            loop {
                ticker.tick().await;
                let fix = simulated_fix(origin, seq, Utc::now().timestamp_millis());
                if tx.send(Ok(fix)).await.is_err() {
                    log::debug!("[location] simulated stream closed after {} fixes", seq);
                    break;
                }
                seq += 1;
            }
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_delivers_to_subscriber() {
        let (source, feed) = ChannelLocationSource::new();
        assert!(!feed.push_fix(LocationFix::new(1.0, 2.0, 5.0, 0)));

        let mut stream = source.subscribe(WatchOptions::default()).unwrap();
        assert!(feed.is_subscribed());
        assert!(feed.push_fix(LocationFix::new(1.0, 2.0, 5.0, 0)));
        assert!(feed.push_error(LocationError::Timeout));

        assert_eq!(stream.next().await, Some(Ok(LocationFix::new(1.0, 2.0, 5.0, 0))));
        assert_eq!(stream.next().await, Some(Err(LocationError::Timeout)));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_subscription() {
        let (source, feed) = ChannelLocationSource::new();
        let stream = source.subscribe(WatchOptions::default()).unwrap();
        drop(stream);
        assert!(!feed.is_subscribed());
        assert!(!feed.push_fix(LocationFix::new(1.0, 2.0, 5.0, 0)));
    }

    #[test]
    fn test_permission_and_availability_flags() {
        let (source, feed) = ChannelLocationSource::new();
        feed.set_available(false);
        assert!(!source.is_available());

        feed.set_permission_denied(true);
        assert_eq!(
            source.subscribe(WatchOptions::default()).err(),
            Some(LocationError::PermissionDenied)
        );
        assert_eq!(feed.subscription_count(), 0);
    }

    #[test]
    fn test_simulated_route_degrades_every_tenth_fix() {
        let fix = simulated_fix((0.0, 0.0), 9, 0);
        assert_eq!(fix.accuracy_m, 150.0);
        let fix = simulated_fix((0.0, 0.0), 3, 0);
        assert!(fix.accuracy_m < 10.0);
        assert!(fix.speed_mps.unwrap() > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_source_emits_fixes() {
        let source = SimulatedLocationSource::new(10.0, 20.0, Duration::from_secs(1));
        let mut stream = source.subscribe(WatchOptions::default()).unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.latitude, 10.0);
        assert!(second.latitude > first.latitude);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(LocationError::PermissionDenied.to_string(), "Location permission denied");
        assert!(LocationError::Unknown("boom".into()).to_string().contains("boom"));
    }
}
