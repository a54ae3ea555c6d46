use thiserror::Error;

use crate::protocol::{EventKind, TripId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    /// The channel is not connected. The caller keeps the payload and retries.
    #[error("channel is not connected")]
    ChannelUnavailable,

    #[error("road routing lookup failed: {0}")]
    RoutingLookupFailed(String),

    #[error("position source error: {0}")]
    PositionSourceError(String),

    #[error("invalid coordinate: lat {lat}, lng {lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("average speed must be positive and finite, got {0} km/h")]
    InvalidSpeed(f64),

    #[error("demo motion needs at least one step")]
    InvalidStepCount,

    #[error("trip {0} has ended")]
    SessionEnded(TripId),

    #[error("event for trip {received} delivered to session {expected}")]
    TripMismatch { expected: TripId, received: TripId },

    #[error("event {0} is not accepted here")]
    UnexpectedEvent(EventKind),

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Protocol(err.to_string())
    }
}
