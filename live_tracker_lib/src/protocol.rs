use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::TrackerError,
    position::{Position, TrackPoint},
};

/// Opaque trip identifier shared by both peers of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(String);

impl TripId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub vehicle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TripStatus {
    AwaitingLocation,
    Active,
    Ended,
}

/// State of the link between a peer and the channel, as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum LinkState {
    Connected,
    Disconnected,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub trip_id: TripId,
    #[serde(flatten)]
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStartPayload {
    pub trip_id: TripId,
    pub provider: ProviderInfo,
}

/// Full derived state of one trip, as handed to observers and sent in `trip:data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSnapshot {
    pub trip_id: TripId,
    pub status: TripStatus,
    pub provider: Option<ProviderInfo>,
    pub customer_position: Option<Position>,
    pub provider_position: Option<Position>,
    pub traveled_route: Vec<TrackPoint>,
    pub road_route: Vec<Position>,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub ride_elapsed_minutes: u32,
    pub link: LinkState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CustomerJoin,
    CustomerLocation,
    ProviderStart,
    ProviderLocation,
    LocationUpdate,
    TripEnd,
    TripData,
    TripEnded,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::CustomerJoin,
        EventKind::CustomerLocation,
        EventKind::ProviderStart,
        EventKind::ProviderLocation,
        EventKind::LocationUpdate,
        EventKind::TripEnd,
        EventKind::TripData,
        EventKind::TripEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CustomerJoin => "customer:join",
            EventKind::CustomerLocation => "customer:location",
            EventKind::ProviderStart => "provider:start",
            EventKind::ProviderLocation => "provider:location",
            EventKind::LocationUpdate => "location:update",
            EventKind::TripEnd => "trip:end",
            EventKind::TripData => "trip:data",
            EventKind::TripEnded => "trip:ended",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every message exchanged over the channel. On the wire this is
/// `{"event": "<name>", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum TripEvent {
    #[serde(rename = "customer:join")]
    CustomerJoin(TripId),
    #[serde(rename = "customer:location")]
    CustomerLocation(LocationPayload),
    #[serde(rename = "provider:start")]
    ProviderStart(ProviderStartPayload),
    #[serde(rename = "provider:location")]
    ProviderLocation(LocationPayload),
    #[serde(rename = "location:update")]
    LocationUpdate(LocationPayload),
    #[serde(rename = "trip:end")]
    TripEnd(TripId),
    #[serde(rename = "trip:data")]
    TripData(Box<TripSnapshot>),
    #[serde(rename = "trip:ended")]
    TripEnded(TripId),
}

impl TripEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TripEvent::CustomerJoin(_) => EventKind::CustomerJoin,
            TripEvent::CustomerLocation(_) => EventKind::CustomerLocation,
            TripEvent::ProviderStart(_) => EventKind::ProviderStart,
            TripEvent::ProviderLocation(_) => EventKind::ProviderLocation,
            TripEvent::LocationUpdate(_) => EventKind::LocationUpdate,
            TripEvent::TripEnd(_) => EventKind::TripEnd,
            TripEvent::TripData(_) => EventKind::TripData,
            TripEvent::TripEnded(_) => EventKind::TripEnded,
        }
    }

    pub fn trip_id(&self) -> &TripId {
        match self {
            TripEvent::CustomerJoin(trip_id)
            | TripEvent::TripEnd(trip_id)
            | TripEvent::TripEnded(trip_id) => trip_id,
            TripEvent::CustomerLocation(payload)
            | TripEvent::ProviderLocation(payload)
            | TripEvent::LocationUpdate(payload) => &payload.trip_id,
            TripEvent::ProviderStart(payload) => &payload.trip_id,
            TripEvent::TripData(snapshot) => &snapshot.trip_id,
        }
    }

    pub fn provider_location(trip_id: TripId, position: Position) -> Self {
        TripEvent::ProviderLocation(LocationPayload { trip_id, position })
    }

    pub fn customer_location(trip_id: TripId, position: Position) -> Self {
        TripEvent::CustomerLocation(LocationPayload { trip_id, position })
    }

    pub fn to_json(&self) -> Result<String, TrackerError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, TrackerError> {
        Ok(serde_json::from_str(text)?)
    }
}
