use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use crate::{
    error::TrackerError,
    geo_math::{self, DEFAULT_AVERAGE_SPEED_KMH},
    protocol::{TripEvent, TripId, TripSnapshot, TripStatus},
    session::{SessionEffect, TripSession},
};

const DEFAULT_RIDE_TICK: Duration = Duration::from_secs(60);

/// Who receives a relayed event, relative to the peer that sent the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Sender,
    Room,
    RoomExceptSender,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub audience: Audience,
    pub event: TripEvent,
}

#[derive(Debug, Default, PartialEq)]
pub struct RelayOutcome {
    /// Room the sender joins before deliveries go out.
    pub join: Option<TripId>,
    pub deliveries: Vec<Delivery>,
    /// Session work for the trip the event belonged to. The hub runs ride
    /// timers; road snapping stays with the peers.
    pub effects: Vec<SessionEffect>,
}

/// Server side of the channel. Keeps one authoritative session per live trip
/// and decides which peers hear about each incoming event. An ended trip only
/// leaves its identifier behind, so it is never reused.
#[derive(Debug)]
pub struct TripRelay {
    sessions: HashMap<TripId, TripSession>,
    ended: HashSet<TripId>,
    average_speed_kmh: f64,
    ride_tick: Duration,
}

impl Default for TripRelay {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            ended: HashSet::new(),
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            ride_tick: DEFAULT_RIDE_TICK,
        }
    }
}

impl TripRelay {
    pub fn new(average_speed_kmh: f64) -> Result<Self, TrackerError> {
        Ok(Self {
            average_speed_kmh: geo_math::validate_speed(average_speed_kmh)?,
            ..Self::default()
        })
    }

    pub fn with_ride_tick(mut self, ride_tick: Duration) -> Result<Self, TrackerError> {
        if ride_tick.is_zero() {
            return Err(TrackerError::Config("ride tick must be positive".into()));
        }
        self.ride_tick = ride_tick;
        Ok(self)
    }

    pub fn ride_tick(&self) -> Duration {
        self.ride_tick
    }

    pub fn snapshot(&self, trip_id: &TripId) -> Option<TripSnapshot> {
        self.sessions.get(trip_id).map(TripSession::snapshot).or_else(|| {
            self.ended
                .contains(trip_id)
                .then(|| TripSession::tombstone(trip_id.clone()).snapshot())
        })
    }

    /// Live trips only; ended ones are not counted.
    pub fn trip_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_ended(&self, trip_id: &TripId) -> bool {
        self.ended.contains(trip_id)
    }

    /// Advances the ride timer of a live trip. `false` once there is nothing
    /// left to count for.
    pub fn tick_ride_timer(&mut self, trip_id: &TripId) -> bool {
        self.sessions
            .get_mut(trip_id)
            .is_some_and(TripSession::tick_ride_timer)
    }

    /// Drops a trip nobody is waiting on any more, as long as no provider
    /// sample ever arrived for it. Returns whether it was dropped.
    pub fn forget_idle(&mut self, trip_id: &TripId) -> bool {
        let idle = self
            .sessions
            .get(trip_id)
            .is_some_and(|session| session.status() == TripStatus::AwaitingLocation);

        if idle {
            self.sessions.remove(trip_id);
            tracing::debug!("Forgot idle trip {}", trip_id);
        }
        idle
    }

    pub fn handle(&mut self, event: TripEvent) -> Result<RelayOutcome, TrackerError> {
        let trip_id = event.trip_id().clone();

        if let TripEvent::LocationUpdate(_) | TripEvent::TripData(_) | TripEvent::TripEnded(_) = event {
            return Err(TrackerError::UnexpectedEvent(event.kind()));
        }

        if self.ended.contains(&trip_id) {
            return match event {
                TripEvent::CustomerJoin(_) => Ok(RelayOutcome {
                    deliveries: vec![to(Audience::Sender, TripEvent::TripEnded(trip_id))],
                    ..RelayOutcome::default()
                }),
                _ => Err(TrackerError::SessionEnded(trip_id)),
            };
        }

        match &event {
            TripEvent::CustomerJoin(_) => {
                let existed = self.sessions.contains_key(&trip_id);
                let session = self.session_mut(&trip_id)?;

                let deliveries = if existed {
                    vec![to(Audience::Sender, TripEvent::TripData(Box::new(session.snapshot())))]
                } else {
                    Vec::new()
                };

                tracing::info!("Customer joined trip {}", trip_id);
                Ok(RelayOutcome {
                    join: Some(trip_id),
                    deliveries,
                    effects: Vec::new(),
                })
            }
            TripEvent::CustomerLocation(_) | TripEvent::ProviderLocation(_) => {
                let effects = self.session_mut(&trip_id)?.apply(&event)?;
                Ok(RelayOutcome {
                    join: None,
                    deliveries: vec![to(Audience::RoomExceptSender, event)],
                    effects,
                })
            }
            TripEvent::ProviderStart(payload) => {
                let session = self.session_mut(&trip_id)?;
                let effects = session.apply(&event)?;
                tracing::info!("Provider {} started trip {}", payload.provider.name, trip_id);

                let snapshot = session.snapshot();
                Ok(RelayOutcome {
                    join: Some(trip_id),
                    deliveries: vec![to(Audience::RoomExceptSender, TripEvent::TripData(Box::new(snapshot)))],
                    effects,
                })
            }
            TripEvent::TripEnd(_) => {
                let effects = self.session_mut(&trip_id)?.apply(&event)?;
                self.sessions.remove(&trip_id);
                self.ended.insert(trip_id.clone());

                Ok(RelayOutcome {
                    join: None,
                    deliveries: vec![to(Audience::Room, TripEvent::TripEnded(trip_id))],
                    effects,
                })
            }
            TripEvent::LocationUpdate(_) | TripEvent::TripData(_) | TripEvent::TripEnded(_) => {
                Err(TrackerError::UnexpectedEvent(event.kind()))
            }
        }
    }

    fn session_mut(&mut self, trip_id: &TripId) -> Result<&mut TripSession, TrackerError> {
        if !self.sessions.contains_key(trip_id) {
            let session = TripSession::with_speed(trip_id.clone(), self.average_speed_kmh)?;
            self.sessions.insert(trip_id.clone(), session);
        }

        self.sessions
            .get_mut(trip_id)
            .ok_or_else(|| TrackerError::SessionEnded(trip_id.clone()))
    }
}

fn to(audience: Audience, event: TripEvent) -> Delivery {
    Delivery { audience, event }
}
