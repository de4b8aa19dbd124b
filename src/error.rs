use thiserror::Error;

use crate::location::LocationError;

/// Trip recorder error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Geolocation is not supported on this device")]
    LocationUnavailable,

    #[error("{0}")]
    Location(#[from] LocationError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not enough points tracked to save.")]
    NotEnoughPoints,

    #[error("Current position unknown, wait for a location fix before marking a point of interest")]
    NoCurrentPosition,

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Geocoding failed: {0}")]
    Geocoding(String),

    #[error("Trip rejected: {0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RecorderError {
    fn from(e: serde_json::Error) -> Self {
        RecorderError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for RecorderError {
    fn from(e: std::io::Error) -> Self {
        RecorderError::Storage(e.to_string())
    }
}

/// Result type for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_error_message_passes_through() {
        let err: RecorderError = LocationError::PermissionDenied.into();
        assert_eq!(err.to_string(), LocationError::PermissionDenied.to_string());
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: RecorderError = io.into();
        assert!(matches!(err, RecorderError::Storage(msg) if msg.contains("read-only")));
    }
}
