use chrono::{DateTime, Utc};
use geo_types::{Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// A validated WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct Position {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct RawPosition {
    lat: f64,
    lng: f64,
}

impl TryFrom<RawPosition> for Position {
    type Error = TrackerError;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        Position::new(raw.lat, raw.lng)
    }
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Result<Self, TrackerError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            // NaN fails both range checks too
            return Err(TrackerError::InvalidCoordinate { lat, lng });
        }

        Ok(Self::normalized(lat, lng))
    }

    /// One representation per point on the globe: longitude is meaningless at
    /// the poles, and -180 is the same meridian as 180.
    fn normalized(lat: f64, lng: f64) -> Self {
        let lng = if lat.abs() == 90.0 {
            0.0
        } else if lng == -180.0 {
            180.0
        } else {
            lng
        };
        Self { lat, lng }
    }

    /// Literal coordinates that are in range by construction.
    pub(crate) const fn from_trusted(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// Straight interpolation in degree space. `fraction` is clamped to [0, 1],
    /// so the result stays inside the box spanned by the two endpoints.
    pub fn lerp(&self, other: &Position, fraction: f64) -> Position {
        let fraction = fraction.clamp(0.0, 1.0);
        Position {
            lat: self.lat + (other.lat - self.lat) * fraction,
            lng: self.lng + (other.lng - self.lng) * fraction,
        }
    }
}

impl From<Position> for Coord {
    fn from(position: Position) -> Self {
        Coord { x: position.lng, y: position.lat }
    }
}

impl TryFrom<Coord> for Position {
    type Error = TrackerError;

    fn try_from(coord: Coord) -> Result<Self, Self::Error> {
        Position::new(coord.y, coord.x)
    }
}

pub fn to_line_string(positions: &[Position]) -> LineString {
    positions.iter().map(|p| Coord::from(*p)).collect()
}

/// One accepted sample of a provider's movement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

impl TrackPoint {
    pub fn new(position: Position, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            timestamp,
        }
    }

    pub fn now(position: Position) -> Self {
        Self::new(position, Utc::now())
    }
}
