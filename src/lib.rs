// Trip Recorder
// GPS trip recording: sample filtering, crash-safe session persistence, GPX export

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod geocode;
pub mod gpx;
pub mod location;
pub mod session;
pub mod storage;
pub mod track;

pub use api::{NewTrip, TravelMode, TripApiClient, TripDetails, TripId, TripSubmitter};
pub use config::RecorderConfig;
pub use controller::{SessionController, SessionSnapshot};
pub use error::{RecorderError, RecorderResult};
pub use filter::SampleFilter;
pub use gpx::export_gpx;
pub use location::{LocationError, LocationFix, LocationSource};
pub use session::{RecordingSession, SessionStatus};
pub use storage::{FileStore, MemoryStore, SessionStore, StoredSession, StoredStatus};
pub use track::{PointOfInterest, TrackPoint, TrackStats};
