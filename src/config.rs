use std::time::Duration;

/// Fixes with an accuracy radius at or above this are not recorded.
pub const ACCURACY_THRESHOLD_M: f64 = 100.0;

/// How long a single position request may take before it times out.
pub const FIX_TIMEOUT: Duration = Duration::from_secs(15);

/// Cached fixes older than this are not accepted by the positioning source.
pub const MAX_FIX_AGE: Duration = Duration::from_secs(5);

pub const TIMER_TICK: Duration = Duration::from_secs(1);

/// A session needs at least this many points to be offered for saving.
pub const MIN_POINTS_TO_SAVE: usize = 2;

pub const POI_NAME_PLACEHOLDER: &str = "Resolving name...";
pub const POI_NAME_FALLBACK: &str = "Name unavailable";

/// Options passed to every location subscription
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: FIX_TIMEOUT,
            maximum_age: MAX_FIX_AGE,
        }
    }
}

/// Recorder tuning. The defaults are the production values.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub accuracy_threshold_m: f64,
    pub timer_tick: Duration,
    pub watch: WatchOptions,
    /// Restore sessions interrupted mid-tracking into `Paused` instead of discarding them.
    pub recover_interrupted: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold_m: ACCURACY_THRESHOLD_M,
            timer_tick: TIMER_TICK,
            watch: WatchOptions::default(),
            recover_interrupted: true,
        }
    }
}
