//! Session controller.
//!
//! Owns the single [`RecordingSession`] and the two background producers that
//! mutate it: the location pump (one task per subscription) and the elapsed
//! timer. Both take the same mutex for every mutation, and both carry the
//! `epoch` they were started under. Pause/stop/start bump the epoch and abort
//! the tasks, so a task that wakes after cancellation exits without touching
//! the session.
//!
//! Operations never return errors for state-machine failures; they land in
//! `last_error` and callers observe them through [`SessionController::snapshot`].
//! Only [`SessionController::save_trip`] returns a `Result`, since it is a
//! network request.
//!
//! Pause, stop and POI updates are written to the store before the call
//! returns. Point appends are written on the blocking pool, so a slow `fsync`
//! never stalls the runtime; every write carries a sequence number and a write
//! that has been overtaken by a newer one is skipped.
//!
//! All operations spawn onto the ambient Tokio runtime and must be called from
//! within one.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::api::{NewTrip, TripDetails, TripId, TripSubmitter};
use crate::config::RecorderConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::filter::SampleFilter;
use crate::geocode::{resolve_or_fallback, ReverseGeocoder};
use crate::gpx::export_gpx;
use crate::location::{simulated_fix, LocationError, LocationFix, LocationSource, LocationStream};
use crate::session::{RecordingSession, SessionStatus, StopOutcome};
use crate::storage::{SessionStore, StoredSession};
use crate::track::{coordinates_valid, PointOfInterest, TrackPoint, TrackStats};

const SYNTHETIC_POINT_COUNT: u64 = 5;
const SYNTHETIC_ORIGIN: (f64, f64) = (44.4949, 11.3426);

/// Read-only view of the session for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub points: Vec<TrackPoint>,
    pub pois: Vec<PointOfInterest>,
    pub start_timestamp_ms: Option<i64>,
    pub elapsed_seconds: u64,
    pub last_error: Option<String>,
    pub current_position: Option<LocationFix>,
    pub stats: TrackStats,
}

impl SessionSnapshot {
    pub fn is_tracking(&self) -> bool {
        self.status == SessionStatus::Tracking
    }

    pub fn is_paused(&self) -> bool {
        self.status == SessionStatus::Paused
    }

    pub fn needs_saving(&self) -> bool {
        self.status == SessionStatus::PendingSave
    }
}

struct ControllerState {
    session: RecordingSession,
    current_position: Option<LocationFix>,
    // Bumped whenever acquisition is cancelled.
    epoch: u64,
    // Bumped whenever the session is replaced or closed.
    generation: u64,
    pump: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    // Sequence number of the most recently issued store write.
    write_seq: u64,
    pending_write: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn cancel_tasks(&mut self) {
        self.epoch += 1;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

enum StoreWrite {
    Save(StoredSession),
    Clear,
}

fn save_failed_message(error: impl std::fmt::Display) -> String {
    format!("Trip progress could not be saved on this device: {}", error)
}

struct Shared {
    state: Mutex<ControllerState>,
    store: Arc<dyn SessionStore>,
    // Sequence number of the last write applied to the store.
    written: Mutex<u64>,
    location: Arc<dyn LocationSource>,
    geocoder: Arc<dyn ReverseGeocoder>,
    filter: SampleFilter,
    config: RecorderConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `write` unless a newer write already reached the store.
    fn commit(&self, seq: u64, write: StoreWrite) -> Option<RecorderResult<()>> {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        if *written >= seq {
            return None;
        }
        *written = seq;
        Some(match write {
            StoreWrite::Save(document) => self.store.save(&document),
            StoreWrite::Clear => self.store.clear(),
        })
    }

    /// Write the session through. Failure is a warning, recording continues in memory.
    fn persist(&self, state: &mut ControllerState) {
        state.write_seq += 1;
        let document = state.session.to_stored();
        if let Some(Err(e)) = self.commit(state.write_seq, StoreWrite::Save(document)) {
            log::warn!("[controller] failed to persist session: {}", e);
            state.session.set_error(save_failed_message(e));
        }
    }

    /// Best-effort write on the blocking pool, used for point appends.
    fn persist_in_background(self: &Arc<Self>, state: &mut ControllerState) {
        state.write_seq += 1;
        let seq = state.write_seq;
        let generation = state.generation;
        let document = state.session.to_stored();

        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let writer = Arc::clone(&shared);
            let outcome = tokio::task::spawn_blocking(move || {
                writer.commit(seq, StoreWrite::Save(document))
            })
            .await;

            let message = match outcome {
                Ok(Some(Err(e))) => e.to_string(),
                Ok(_) => return,
                Err(e) => e.to_string(),
            };
            log::warn!("[controller] failed to persist session: {}", message);
            let mut state = shared.lock();
            if state.generation == generation {
                state.session.set_error(save_failed_message(message));
            }
        });
        state.pending_write = Some(handle);
    }

    fn clear_store(&self, state: &mut ControllerState) {
        state.write_seq += 1;
        if let Some(Err(e)) = self.commit(state.write_seq, StoreWrite::Clear) {
            log::warn!("[controller] failed to clear stored session: {}", e);
            state
                .session
                .set_error(format!("Stored trip could not be removed: {}", e));
        }
    }

    fn ingest_fix(self: &Arc<Self>, state: &mut ControllerState, fix: LocationFix) {
        if !coordinates_valid(fix.latitude, fix.longitude) {
            log::debug!(
                "[controller] dropped fix with invalid coordinates ({}, {})",
                fix.latitude,
                fix.longitude
            );
            return;
        }

        let point = self.filter.apply(&fix);
        state.current_position = Some(fix);

        let Some(point) = point else {
            log::debug!("[controller] dropped low-accuracy fix");
            return;
        };

        match state.session.record_point(point) {
            Ok(armed) => {
                if armed && state.timer.is_none() {
                    state.timer = Some(self.spawn_timer(state.epoch));
                }
                self.persist_in_background(state);
            }
            Err(e) => log::debug!("[controller] fix ignored: {}", e),
        }
    }

    fn fail_stop(&self, state: &mut ControllerState, error: &LocationError) {
        log::warn!("[controller] location acquisition failed, stopping: {}", error);
        state.cancel_tasks();
        state.session.fail(error);
    }

    fn spawn_pump(self: &Arc<Self>, mut stream: LocationStream, epoch: u64) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let mut state = shared.lock();
                if state.epoch != epoch {
                    return;
                }
                match event {
                    Ok(fix) => shared.ingest_fix(&mut state, fix),
                    Err(error) => {
                        shared.fail_stop(&mut state, &error);
                        return;
                    }
                }
            }

            let mut state = shared.lock();
            if state.epoch == epoch {
                shared.fail_stop(&mut state, &LocationError::PositionUnavailable);
            }
        })
    }

    fn spawn_timer(self: &Arc<Self>, epoch: u64) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        let period = self.config.timer_tick;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let mut state = shared.lock();
                if state.epoch != epoch {
                    return;
                }
                state.session.tick();
            }
        })
    }

    /// Subscribe and start pumping fixes. Returns false with `last_error` set on failure.
    fn begin_acquisition(self: &Arc<Self>, state: &mut ControllerState) -> bool {
        match self.location.subscribe(self.config.watch) {
            Ok(stream) => {
                state.pump = Some(self.spawn_pump(stream, state.epoch));
                true
            }
            Err(e) => {
                log::warn!("[controller] could not subscribe to location: {}", e);
                state.session.set_error(e.to_string());
                false
            }
        }
    }
}

/// Orchestrates recording for the UI layer
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// Create the controller, restoring any session left in the store.
    pub fn new(
        config: RecorderConfig,
        store: Arc<dyn SessionStore>,
        location: Arc<dyn LocationSource>,
        geocoder: Arc<dyn ReverseGeocoder>,
    ) -> Self {
        let mut session = RecordingSession::new();
        let mut discard_stored = true;

        // A missing or unreadable slot is cleared too.
        if let Some(stored) = store.load() {
            match RecordingSession::from_stored(stored, config.recover_interrupted) {
                Some(restored) => {
                    log::info!(
                        "[controller] restored {:?} session with {} points",
                        restored.status(),
                        restored.points().len()
                    );
                    session = restored;
                    discard_stored = false;
                }
                None => log::info!("[controller] discarding stored session without enough data"),
            }
        }

        if discard_stored {
            if let Err(e) = store.clear() {
                log::warn!("[controller] failed to clear stored session: {}", e);
            }
        }

        let state = ControllerState {
            session,
            current_position: None,
            epoch: 0,
            generation: 0,
            pump: None,
            timer: None,
            write_seq: 0,
            pending_write: None,
        };

        SessionController {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                store,
                written: Mutex::new(0),
                location,
                filter: SampleFilter::new(config.accuracy_threshold_m),
                geocoder,
                config,
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock().session.status()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.lock();
        let session = &state.session;
        SessionSnapshot {
            status: session.status(),
            points: session.points().to_vec(),
            pois: session.pois().to_vec(),
            start_timestamp_ms: session.start_timestamp_ms(),
            elapsed_seconds: session.elapsed_seconds(),
            last_error: session.last_error().map(str::to_string),
            current_position: state.current_position.clone(),
            stats: TrackStats::from_points(session.points()),
        }
    }

    /// Wait until the most recent point write has reached the store.
    pub async fn flush(&self) {
        let pending = self.shared.lock().pending_write.take();
        if let Some(handle) = pending {
            if let Err(e) = handle.await {
                log::warn!("[controller] background write did not finish: {}", e);
            }
        }
    }

    /// Start a new recording, discarding any previous one.
    pub fn start(&self) -> SessionStatus {
        let shared = &self.shared;
        let mut state = shared.lock();

        state.cancel_tasks();
        state.generation += 1;
        state.current_position = None;
        state.session.discard();
        shared.clear_store(&mut state);

        if !shared.location.is_available() {
            state.session.set_error(RecorderError::LocationUnavailable.to_string());
            return state.session.status();
        }

        state.session.begin();
        if !shared.begin_acquisition(&mut state) {
            // Permission denied: stay idle, keep the message.
            let message = state.session.last_error().map(str::to_string);
            state.session.discard();
            if let Some(message) = message {
                state.session.set_error(message);
            }
            return state.session.status();
        }

        log::info!("[controller] recording started");
        state.session.status()
    }

    pub fn pause(&self) -> SessionStatus {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.session.status() != SessionStatus::Tracking {
            log::debug!("[controller] pause ignored in {:?}", state.session.status());
            return state.session.status();
        }

        state.cancel_tasks();
        if let Err(e) = state.session.pause() {
            log::debug!("[controller] pause failed: {}", e);
        }
        shared.persist(&mut state);
        log::info!("[controller] recording paused at {}s", state.session.elapsed_seconds());
        state.session.status()
    }

    pub fn resume(&self) -> SessionStatus {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.session.status() != SessionStatus::Paused {
            log::debug!("[controller] resume ignored in {:?}", state.session.status());
            return state.session.status();
        }

        state.cancel_tasks();
        if !shared.location.is_available() {
            state.session.set_error(RecorderError::LocationUnavailable.to_string());
            return state.session.status();
        }
        if !shared.begin_acquisition(&mut state) {
            return state.session.status();
        }
        state.session.clear_error();
        if let Err(e) = state.session.resume() {
            log::debug!("[controller] resume failed: {}", e);
        }
        log::info!("[controller] recording resumed");
        state.session.status()
    }

    pub fn stop(&self) -> SessionStatus {
        let shared = &self.shared;
        let mut state = shared.lock();

        if !matches!(
            state.session.status(),
            SessionStatus::Tracking | SessionStatus::Paused
        ) {
            log::debug!("[controller] stop ignored in {:?}", state.session.status());
            return state.session.status();
        }

        state.cancel_tasks();
        match state.session.stop() {
            Ok(StopOutcome::PendingSave) => {
                shared.persist(&mut state);
                log::info!(
                    "[controller] recording stopped with {} points, waiting to be saved",
                    state.session.points().len()
                );
            }
            Ok(StopOutcome::Discarded) => {
                state.generation += 1;
                state.current_position = None;
                shared.clear_store(&mut state);
                log::info!("[controller] recording discarded, not enough points");
            }
            Err(e) => log::debug!("[controller] stop failed: {}", e),
        }
        state.session.status()
    }

    /// Discard the session regardless of state.
    pub fn clear_session(&self) -> SessionStatus {
        let shared = &self.shared;
        let mut state = shared.lock();

        state.cancel_tasks();
        state.generation += 1;
        state.current_position = None;
        state.session.discard();
        shared.clear_store(&mut state);
        log::info!("[controller] session cleared");
        state.session.status()
    }

    /// Mark the current position. Returns the new POI's id.
    ///
    /// The POI is appended with a placeholder name straight away; the real
    /// name is looked up in the background and patched in by id.
    pub fn add_point_of_interest(&self, description: Option<String>) -> Option<u64> {
        let shared = &self.shared;
        let mut state = shared.lock();

        let Some(position) = state.current_position.clone() else {
            state.session.set_error(RecorderError::NoCurrentPosition.to_string());
            return None;
        };

        let id = match state.session.add_poi(
            position.latitude,
            position.longitude,
            Utc::now().timestamp_millis(),
            description,
        ) {
            Ok(id) => id,
            Err(e) => {
                state.session.set_error(e.to_string());
                return None;
            }
        };
        shared.persist(&mut state);

        let generation = state.generation;
        let task_shared = Arc::clone(shared);
        tokio::spawn(async move {
            let name = resolve_or_fallback(
                task_shared.geocoder.as_ref(),
                position.latitude,
                position.longitude,
            )
            .await;

            let mut state = task_shared.lock();
            if state.generation != generation {
                return;
            }
            if state.session.resolve_poi_name(id, name) {
                task_shared.persist(&mut state);
            }
        });

        Some(id)
    }

    /// Development aid: feed a short synthetic route through the sample filter.
    ///
    /// Only acts while tracking, so the session never records without an
    /// active subscription behind it.
    pub fn add_synthetic_points(&self) -> usize {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.session.status() != SessionStatus::Tracking {
            log::debug!("[controller] synthetic points ignored in {:?}", state.session.status());
            return 0;
        }

        let origin = state
            .current_position
            .as_ref()
            .map(|p| (p.latitude, p.longitude))
            .unwrap_or(SYNTHETIC_ORIGIN);
        let now = Utc::now().timestamp_millis();
        let before = state.session.points().len();

        for seq in 0..SYNTHETIC_POINT_COUNT {
            let mut fix = simulated_fix(origin, seq + 1, now + (seq as i64) * 1_000);
            fix.accuracy_m = 5.0;
            shared.ingest_fix(&mut state, fix);
        }

        state.session.points().len() - before
    }

    /// Export the pending session and submit it. Clears the session on success.
    pub async fn save_trip(
        &self,
        details: TripDetails,
        submitter: &dyn TripSubmitter,
    ) -> RecorderResult<TripId> {
        let (trip, generation) = {
            let mut state = self.shared.lock();
            if state.session.status() != SessionStatus::PendingSave {
                return Err(RecorderError::InvalidState(
                    "No stopped trip waiting to be saved".to_string(),
                ));
            }
            let session = &state.session;
            let gpx = match export_gpx(session.points(), session.pois(), &details.title) {
                Ok(gpx) => gpx,
                Err(e) => {
                    state.session.set_error(e.to_string());
                    return Err(e);
                }
            };
            (NewTrip::new(details, gpx), state.generation)
        };

        let result = submitter.submit_trip(&trip).await;

        let mut state = self.shared.lock();
        match result {
            Ok(id) => {
                if state.generation == generation
                    && state.session.status() == SessionStatus::PendingSave
                {
                    if let Err(e) = state.session.complete_save() {
                        log::debug!("[controller] complete_save failed: {}", e);
                    }
                    state.generation += 1;
                    state.current_position = None;
                    self.shared.clear_store(&mut state);
                }
                Ok(id)
            }
            Err(e) => {
                log::warn!("[controller] trip submission failed: {}", e);
                if state.generation == generation {
                    state.session.set_error(e.to_string());
                }
                Err(e)
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shared.lock().cancel_tasks();
    }
}
