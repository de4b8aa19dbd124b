//! Durable slot for the in-progress recording.
//!
//! # Document Format
//!
//! ```json
//! {
//!   "points": [
//!     { "lat": 44.49, "lon": 11.34, "timestamp": 1700000000000, "altitude": 52.0, "speed": 14.2 }
//!   ],
//!   "pointsOfInterest": [
//!     { "id": 0, "lat": 44.49, "lon": 11.34, "timestamp": 1700000000500, "name": "Bologna" }
//!   ],
//!   "elapsedTime": 42,
//!   "startTime": 1700000000000,
//!   "status": "idle" | "paused" | "stopped"
//! }
//! ```
//!
//! One slot, overwritten in place. A missing slot means no session. Anything
//! that fails to parse or validate is reported as "no session" with a warning,
//! never as an error.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, RecorderResult};
use crate::track::{coordinates_valid, PointOfInterest, TrackPoint};

/// Status flag as written to the durable document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredStatus {
    Idle,
    Paused,
    Stopped,
}

/// The durable local state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub points: Vec<TrackPoint>,
    #[serde(default)]
    pub points_of_interest: Vec<PointOfInterest>,
    #[serde(default)]
    pub elapsed_time: u64,
    #[serde(default)]
    pub start_time: Option<i64>,
    pub status: StoredStatus,
}

impl StoredSession {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse and validate. `None` for anything that is not a usable document.
    pub fn from_json(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        let stored: StoredSession = match serde_json::from_str(raw) {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("[storage] ignoring unreadable session document: {}", e);
                return None;
            }
        };
        if let Err(reason) = stored.validate() {
            log::warn!("[storage] ignoring invalid session document: {}", reason);
            return None;
        }
        Some(stored)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(i) = self
            .points
            .iter()
            .position(|p| !coordinates_valid(p.latitude, p.longitude))
        {
            return Err(format!("point {} has out-of-range coordinates", i));
        }
        if let Some(i) = self
            .points_of_interest
            .iter()
            .position(|p| !coordinates_valid(p.latitude, p.longitude))
        {
            return Err(format!("point of interest {} has out-of-range coordinates", i));
        }
        Ok(())
    }
}

/// Single-slot persistence for a recording session
pub trait SessionStore: Send + Sync {
    /// Overwrite the slot. Must be durable when it returns.
    fn save(&self, session: &StoredSession) -> RecorderResult<()>;

    /// Read the slot. Missing or malformed data loads as `None`.
    fn load(&self) -> Option<StoredSession>;

    fn clear(&self) -> RecorderResult<()>;
}

/// In-process store, used by tests and when no durable location is configured
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the slot with a raw document, valid or not.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        MemoryStore {
            slot: Mutex::new(Some(raw.into())),
            fail_writes: Mutex::new(false),
        }
    }

    /// Make subsequent writes fail, to simulate a full or read-only disk.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn raw(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_writable(&self) -> RecorderResult<()> {
        if *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(RecorderError::Storage("storage quota exceeded".to_string()));
        }
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, session: &StoredSession) -> RecorderResult<()> {
        self.check_writable()?;
        let json = session.to_json()?;
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(json);
        Ok(())
    }

    fn load(&self) -> Option<StoredSession> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_deref().and_then(StoredSession::from_json)
    }

    fn clear(&self) -> RecorderResult<()> {
        self.check_writable()?;
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// JSON file store with atomic replace (temp file, fsync, rename)
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStore for FileStore {
    fn save(&self, session: &StoredSession) -> RecorderResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(session)?;
        let temp_path = self.temp_path();
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Option<StoredSession> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => StoredSession::from_json(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("[storage] failed to read {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn clear(&self) -> RecorderResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
