use serde::{Deserialize, Serialize};

use crate::config::{MIN_POINTS_TO_SAVE, POI_NAME_PLACEHOLDER};
use crate::error::{RecorderError, RecorderResult};
use crate::location::LocationError;
use crate::storage::{StoredSession, StoredStatus};
use crate::track::{PointOfInterest, TrackPoint};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// No recording in progress. A closed session returns here.
    Idle,
    /// Acquiring location and recording accepted fixes
    Tracking,
    /// Acquisition and timer stopped, data kept
    Paused,
    /// Stopped with enough points, waiting for save or discard
    PendingSave,
}

/// Result of stopping a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    PendingSave,
    Discarded,
}

/// The single in-progress recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSession {
    status: SessionStatus,
    points: Vec<TrackPoint>,
    pois: Vec<PointOfInterest>,
    start_timestamp_ms: Option<i64>,
    elapsed_seconds: u64,
    last_error: Option<String>,
    next_poi_id: u64,
    // Set by the first accepted fix after start/resume; gates the timer.
    armed: bool,
}

impl RecordingSession {
    /// Create new session in Idle state
    pub fn new() -> Self {
        RecordingSession {
            status: SessionStatus::Idle,
            points: Vec::new(),
            pois: Vec::new(),
            start_timestamp_ms: None,
            elapsed_seconds: 0,
            last_error: None,
            next_poi_id: 0,
            armed: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn pois(&self) -> &[PointOfInterest] {
        &self.pois
    }

    pub fn start_timestamp_ms(&self) -> Option<i64> {
        self.start_timestamp_ms
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Drop everything and return to Idle. `last_error` is kept.
    fn reset(&mut self) {
        let last_error = self.last_error.take();
        *self = RecordingSession::new();
        self.last_error = last_error;
    }

    /// Begin a fresh recording (Idle → Tracking), replacing whatever was here.
    pub fn begin(&mut self) {
        *self = RecordingSession::new();
        self.status = SessionStatus::Tracking;
    }

    /// Append an accepted point. Returns true when this point armed the timer.
    pub fn record_point(&mut self, point: TrackPoint) -> RecorderResult<bool> {
        match self.status {
            SessionStatus::PendingSave => {
                return Err(RecorderError::InvalidState(
                    "Session is stopped and waiting to be saved".to_string(),
                ))
            }
            SessionStatus::Idle | SessionStatus::Paused => {
                self.status = SessionStatus::Tracking;
            }
            SessionStatus::Tracking => {}
        }

        let timestamp = point.timestamp_ms;
        self.points.push(point);

        if self.armed {
            return Ok(false);
        }
        self.armed = true;
        self.start_timestamp_ms.get_or_insert(timestamp);
        Ok(true)
    }

    /// Advance the elapsed counter by one tick. Only counts while armed and tracking.
    pub fn tick(&mut self) -> bool {
        if self.status == SessionStatus::Tracking && self.armed {
            self.elapsed_seconds += 1;
            true
        } else {
            false
        }
    }

    /// Transition to Paused state (Tracking → Paused)
    pub fn pause(&mut self) -> RecorderResult<()> {
        match self.status {
            SessionStatus::Tracking => {
                self.status = SessionStatus::Paused;
                self.armed = false;
                Ok(())
            }
            SessionStatus::Paused => Err(RecorderError::InvalidState("Already paused".to_string())),
            _ => Err(RecorderError::InvalidState("Not tracking".to_string())),
        }
    }

    /// Transition back to Tracking (Paused → Tracking). Timer re-arms on the next fix.
    pub fn resume(&mut self) -> RecorderResult<()> {
        match self.status {
            SessionStatus::Paused => {
                self.status = SessionStatus::Tracking;
                self.armed = false;
                Ok(())
            }
            SessionStatus::Tracking => {
                Err(RecorderError::InvalidState("Already tracking".to_string()))
            }
            _ => Err(RecorderError::InvalidState("Not paused".to_string())),
        }
    }

    /// Tracking|Paused → PendingSave, or discard when too few points were recorded.
    pub fn stop(&mut self) -> RecorderResult<StopOutcome> {
        match self.status {
            SessionStatus::Tracking | SessionStatus::Paused => {
                self.armed = false;
                if self.points.len() >= MIN_POINTS_TO_SAVE {
                    self.status = SessionStatus::PendingSave;
                    Ok(StopOutcome::PendingSave)
                } else {
                    self.last_error = Some(RecorderError::NotEnoughPoints.to_string());
                    self.reset();
                    Ok(StopOutcome::Discarded)
                }
            }
            SessionStatus::PendingSave => {
                Err(RecorderError::InvalidState("Already stopped".to_string()))
            }
            SessionStatus::Idle => Err(RecorderError::InvalidState("Not recording".to_string())),
        }
    }

    /// Location failure while tracking: fail-stop to Idle.
    ///
    /// Buffered points stay in memory for display; they are only recoverable
    /// through whatever was last written to the store.
    pub fn fail(&mut self, error: &LocationError) {
        self.armed = false;
        self.status = SessionStatus::Idle;
        self.last_error = Some(error.to_string());
    }

    /// PendingSave → closed, after the trip was accepted by the backend.
    pub fn complete_save(&mut self) -> RecorderResult<()> {
        if self.status != SessionStatus::PendingSave {
            return Err(RecorderError::InvalidState("Nothing waiting to be saved".to_string()));
        }
        self.last_error = None;
        self.reset();
        Ok(())
    }

    /// Any state → closed, regardless of point count.
    pub fn discard(&mut self) {
        *self = RecordingSession::new();
    }

    /// Append a POI with a placeholder name. Returns its id.
    pub fn add_poi(
        &mut self,
        latitude: f64,
        longitude: f64,
        timestamp_ms: i64,
        description: Option<String>,
    ) -> RecorderResult<u64> {
        if !matches!(self.status, SessionStatus::Tracking | SessionStatus::Paused) {
            return Err(RecorderError::InvalidState(
                "Points of interest can only be added while recording".to_string(),
            ));
        }

        let id = self.next_poi_id;
        self.next_poi_id += 1;
        self.pois.push(PointOfInterest {
            id: Some(id),
            latitude,
            longitude,
            timestamp_ms,
            name: Some(POI_NAME_PLACEHOLDER.to_string()),
            description: description.filter(|d| !d.trim().is_empty()),
        });
        Ok(id)
    }

    /// Patch the name of a POI in place. Returns false if it no longer exists.
    pub fn resolve_poi_name(&mut self, id: u64, name: String) -> bool {
        match self.pois.iter_mut().find(|p| p.id == Some(id)) {
            Some(poi) => {
                poi.name = Some(name);
                true
            }
            None => false,
        }
    }

    /// Durable form of this session. Active tracking is stored as `idle`.
    pub fn to_stored(&self) -> StoredSession {
        let status = match self.status {
            SessionStatus::Idle | SessionStatus::Tracking => StoredStatus::Idle,
            SessionStatus::Paused => StoredStatus::Paused,
            SessionStatus::PendingSave => StoredStatus::Stopped,
        };
        StoredSession {
            points: self.points.clone(),
            points_of_interest: self.pois.clone(),
            elapsed_time: self.elapsed_seconds,
            start_time: self.start_timestamp_ms,
            status,
        }
    }

    /// Rebuild a session from the store, or `None` when it should be discarded.
    ///
    /// `paused` restores as Paused, `stopped` with enough points as PendingSave.
    /// An `idle` document is a session interrupted mid-tracking; it is restored
    /// as Paused only when `recover_interrupted` is set and it has enough points.
    pub fn from_stored(stored: StoredSession, recover_interrupted: bool) -> Option<Self> {
        let enough_points = stored.points.len() >= MIN_POINTS_TO_SAVE;
        let status = match stored.status {
            StoredStatus::Paused => SessionStatus::Paused,
            StoredStatus::Stopped if enough_points => SessionStatus::PendingSave,
            StoredStatus::Idle if recover_interrupted && enough_points => SessionStatus::Paused,
            _ => return None,
        };

        // Older documents carry no POI ids; number them in stored order.
        let mut pois = stored.points_of_interest;
        let mut next_poi_id = pois.iter().filter_map(|p| p.id).max().map_or(0, |m| m + 1);
        for poi in pois.iter_mut().filter(|p| p.id.is_none()) {
            poi.id = Some(next_poi_id);
            next_poi_id += 1;
        }

        Some(RecordingSession {
            status,
            points: stored.points,
            pois,
            start_timestamp_ms: stored.start_time,
            elapsed_seconds: stored.elapsed_time,
            last_error: None,
            next_poi_id,
            armed: false,
        })
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: i64) -> TrackPoint {
        TrackPoint::new(45.0 + ts as f64 * 1e-5, 7.0, ts)
    }

    fn tracking_with_points(n: usize) -> RecordingSession {
        let mut session = RecordingSession::new();
        session.begin();
        for i in 0..n {
            session.record_point(point(1_000 + i as i64)).unwrap();
        }
        session
    }

    #[test]
    fn test_session_state_transitions() {
        let mut session = RecordingSession::new();
        assert_eq!(session.status(), SessionStatus::Idle);

        session.begin();
        assert_eq!(session.status(), SessionStatus::Tracking);

        session.pause().unwrap();
        assert_eq!(session.status(), SessionStatus::Paused);

        session.resume().unwrap();
        assert_eq!(session.status(), SessionStatus::Tracking);

        session.record_point(point(1)).unwrap();
        session.record_point(point(2)).unwrap();
        assert_eq!(session.stop().unwrap(), StopOutcome::PendingSave);
        assert_eq!(session.status(), SessionStatus::PendingSave);

        session.complete_save().unwrap();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.points().is_empty());
    }

    #[test]
    fn test_invalid_state_transitions() {
        let mut session = RecordingSession::new();
        assert!(session.pause().is_err());
        assert!(session.resume().is_err());
        assert!(session.stop().is_err());
        assert!(session.complete_save().is_err());

        session.begin();
        assert!(session.resume().is_err());
        session.pause().unwrap();
        assert!(session.pause().is_err());
    }

    #[test]
    fn test_first_fix_arms_once() {
        let mut session = RecordingSession::new();
        session.begin();
        assert!(!session.tick());
        assert_eq!(session.start_timestamp_ms(), None);

        assert!(session.record_point(point(500)).unwrap());
        assert!(!session.record_point(point(900)).unwrap());
        assert_eq!(session.start_timestamp_ms(), Some(500));

        session.pause().unwrap();
        session.resume().unwrap();
        assert!(session.record_point(point(2_000)).unwrap());
        assert_eq!(session.start_timestamp_ms(), Some(500));
    }

    #[test]
    fn test_pause_resume_preserves_elapsed() {
        let mut session = tracking_with_points(1);
        for _ in 0..7 {
            session.tick();
        }
        assert_eq!(session.elapsed_seconds(), 7);

        session.pause().unwrap();
        assert!(!session.tick());
        assert_eq!(session.elapsed_seconds(), 7);

        session.resume().unwrap();
        session.record_point(point(5_000)).unwrap();
        for _ in 0..4 {
            session.tick();
        }
        assert_eq!(session.elapsed_seconds(), 11);
    }

    #[test]
    fn test_implicit_transition_to_tracking() {
        let mut session = tracking_with_points(1);
        session.pause().unwrap();
        session.record_point(point(3)).unwrap();
        assert_eq!(session.status(), SessionStatus::Tracking);

        let mut idle = RecordingSession::new();
        idle.record_point(point(1)).unwrap();
        assert_eq!(idle.status(), SessionStatus::Tracking);
    }

    #[test]
    fn test_stop_with_one_point_discards() {
        let mut session = tracking_with_points(1);
        assert_eq!(session.stop().unwrap(), StopOutcome::Discarded);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.points().is_empty());
        assert_eq!(session.last_error(), Some("Not enough points tracked to save."));
    }

    #[test]
    fn test_pending_save_rejects_points() {
        let mut session = tracking_with_points(2);
        session.stop().unwrap();
        assert!(session.record_point(point(10)).is_err());
        assert_eq!(session.points().len(), 2);
    }

    #[test]
    fn test_fail_stop_goes_idle() {
        let mut session = tracking_with_points(3);
        session.fail(&LocationError::Timeout);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.points().len(), 3);
        assert_eq!(
            session.last_error(),
            Some(LocationError::Timeout.to_string().as_str())
        );
        assert!(!session.tick());
    }

    #[test]
    fn test_poi_ids_and_name_patch() {
        let mut session = tracking_with_points(1);
        let a = session.add_poi(45.0, 7.0, 10, Some("lake".to_string())).unwrap();
        // Same timestamp: patching by id keeps them apart.
        let b = session.add_poi(45.0, 7.0, 10, None).unwrap();
        assert_ne!(a, b);
        assert_eq!(session.pois()[0].name.as_deref(), Some(POI_NAME_PLACEHOLDER));

        assert!(session.resolve_poi_name(b, "Lago di Garda".to_string()));
        assert_eq!(session.pois()[0].name.as_deref(), Some(POI_NAME_PLACEHOLDER));
        assert_eq!(session.pois()[1].name.as_deref(), Some("Lago di Garda"));
        assert!(!session.resolve_poi_name(99, "nowhere".to_string()));
    }

    #[test]
    fn test_poi_requires_recording() {
        let mut session = RecordingSession::new();
        assert!(session.add_poi(45.0, 7.0, 10, None).is_err());
    }

    #[test]
    fn test_stored_status_mapping() {
        let mut session = tracking_with_points(2);
        assert_eq!(session.to_stored().status, StoredStatus::Idle);
        session.pause().unwrap();
        assert_eq!(session.to_stored().status, StoredStatus::Paused);
        session.stop().unwrap();
        assert_eq!(session.to_stored().status, StoredStatus::Stopped);
    }

    #[test]
    fn test_restore_from_stored() {
        let mut session = tracking_with_points(5);
        session.tick();
        session.stop().unwrap();
        let stored = session.to_stored();

        let restored = RecordingSession::from_stored(stored.clone(), false).unwrap();
        assert_eq!(restored.status(), SessionStatus::PendingSave);
        assert_eq!(restored.points(), session.points());
        assert_eq!(restored.elapsed_seconds(), 1);
        assert_eq!(restored.start_timestamp_ms(), Some(1_000));

        let mut short = stored;
        short.points.truncate(1);
        assert!(RecordingSession::from_stored(short, false).is_none());
    }

    #[test]
    fn test_restore_interrupted_tracking() {
        let stored = tracking_with_points(3).to_stored();
        assert!(RecordingSession::from_stored(stored.clone(), false).is_none());

        let restored = RecordingSession::from_stored(stored, true).unwrap();
        assert_eq!(restored.status(), SessionStatus::Paused);
        assert!(!restored.is_armed());
    }

    #[test]
    fn test_restore_numbers_legacy_pois() {
        let mut stored = tracking_with_points(2).to_stored();
        stored.status = StoredStatus::Paused;
        stored.points_of_interest = vec![
            PointOfInterest {
                id: None,
                latitude: 1.0,
                longitude: 2.0,
                timestamp_ms: 5,
                name: None,
                description: None,
            },
            PointOfInterest {
                id: Some(4),
                latitude: 1.0,
                longitude: 2.0,
                timestamp_ms: 6,
                name: None,
                description: None,
            },
        ];

        let mut restored = RecordingSession::from_stored(stored, false).unwrap();
        assert_eq!(restored.pois()[0].id, Some(5));
        assert_eq!(restored.pois()[1].id, Some(4));
        assert_eq!(restored.add_poi(0.0, 0.0, 7, None).unwrap(), 6);
    }
}
