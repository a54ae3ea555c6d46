use crate::{
    error::TrackerError,
    geo_math::{self, DEFAULT_AVERAGE_SPEED_KMH},
    position::{Position, TrackPoint},
    protocol::{LinkState, ProviderInfo, TripEvent, TripId, TripSnapshot, TripStatus},
    route::{RouteAccumulator, SnapOutcome, SnapTicket},
};

/// Work the owner of a session has to carry out after an event was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    RequestRoadSnap {
        ticket: SnapTicket,
        from: Position,
        to: Position,
    },
    StartRideTimer,
    StopRideTimer,
}

/// State of one trip. Only mutated through [`TripSession::apply`], ride timer
/// ticks and road-snap results; once ended, nothing changes any more.
#[derive(Debug, Clone)]
pub struct TripSession {
    trip_id: TripId,
    status: TripStatus,
    provider: Option<ProviderInfo>,
    customer_position: Option<Position>,
    provider_position: Option<Position>,
    route: RouteAccumulator,
    distance_km: f64,
    eta_minutes: u32,
    ride_elapsed_minutes: u32,
    ride_timer_running: bool,
    average_speed_kmh: f64,
    link: LinkState,
}

impl TripSession {
    pub fn new(trip_id: TripId) -> Self {
        Self {
            trip_id,
            status: TripStatus::AwaitingLocation,
            provider: None,
            customer_position: None,
            provider_position: None,
            route: RouteAccumulator::new(),
            distance_km: 0.0,
            eta_minutes: 0,
            ride_elapsed_minutes: 0,
            ride_timer_running: false,
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            link: LinkState::Connected,
        }
    }

    /// What is left of a trip after it ended: its identifier and status.
    pub(crate) fn tombstone(trip_id: TripId) -> Self {
        let mut session = Self::new(trip_id);
        session.status = TripStatus::Ended;
        session
    }

    pub fn with_speed(trip_id: TripId, average_speed_kmh: f64) -> Result<Self, TrackerError> {
        let mut session = Self::new(trip_id);
        session.average_speed_kmh = geo_math::validate_speed(average_speed_kmh)?;
        Ok(session)
    }

    pub fn trip_id(&self) -> &TripId {
        &self.trip_id
    }

    pub fn status(&self) -> TripStatus {
        self.status
    }

    pub fn is_ended(&self) -> bool {
        self.status == TripStatus::Ended
    }

    pub fn provider(&self) -> Option<&ProviderInfo> {
        self.provider.as_ref()
    }

    pub fn customer_position(&self) -> Option<Position> {
        self.customer_position
    }

    pub fn provider_position(&self) -> Option<Position> {
        self.provider_position
    }

    pub fn traveled_route(&self) -> &[TrackPoint] {
        self.route.traveled()
    }

    pub fn road_route(&self) -> &[Position] {
        self.route.road()
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn eta_minutes(&self) -> u32 {
        self.eta_minutes
    }

    pub fn ride_elapsed_minutes(&self) -> u32 {
        self.ride_elapsed_minutes
    }

    pub fn apply(&mut self, event: &TripEvent) -> Result<Vec<SessionEffect>, TrackerError> {
        if event.trip_id() != &self.trip_id {
            return Err(TrackerError::TripMismatch {
                expected: self.trip_id.clone(),
                received: event.trip_id().clone(),
            });
        }

        if self.is_ended() {
            return Err(TrackerError::SessionEnded(self.trip_id.clone()));
        }

        let effects = match event {
            TripEvent::CustomerJoin(_) => Vec::new(),
            TripEvent::CustomerLocation(payload) => self.set_customer_position(payload.position),
            TripEvent::ProviderStart(payload) => {
                self.adopt_provider(&payload.provider);
                Vec::new()
            }
            TripEvent::ProviderLocation(payload) => self.accept_provider_position(payload.position, true),
            TripEvent::LocationUpdate(payload) => self.accept_provider_position(payload.position, false),
            TripEvent::TripData(snapshot) => self.catch_up(snapshot),
            TripEvent::TripEnd(_) | TripEvent::TripEnded(_) => self.end(),
        };

        Ok(effects)
    }

    /// One ride timer period has passed. Returns whether the counter moved.
    pub fn tick_ride_timer(&mut self) -> bool {
        if self.is_ended() || self.provider_position.is_none() {
            return false;
        }

        self.ride_elapsed_minutes += 1;
        true
    }

    pub fn apply_road_snap(
        &mut self,
        ticket: SnapTicket,
        result: Result<Vec<Position>, TrackerError>,
    ) -> SnapOutcome {
        if self.is_ended() {
            return SnapOutcome::Superseded;
        }

        self.route.apply_road_snap(ticket, result)
    }

    pub fn set_link(&mut self, link: LinkState) {
        if !self.is_ended() {
            self.link = link;
        }
    }

    pub fn snapshot(&self) -> TripSnapshot {
        TripSnapshot {
            trip_id: self.trip_id.clone(),
            status: self.status,
            provider: self.provider.clone(),
            customer_position: self.customer_position,
            provider_position: self.provider_position,
            traveled_route: self.route.traveled().to_vec(),
            road_route: self.route.road().to_vec(),
            distance_km: self.distance_km,
            eta_minutes: self.eta_minutes,
            ride_elapsed_minutes: self.ride_elapsed_minutes,
            link: self.link.clone(),
        }
    }

    fn adopt_provider(&mut self, provider: &ProviderInfo) {
        if self.provider.is_none() {
            self.provider = Some(provider.clone());
        } else if self.provider.as_ref() != Some(provider) {
            tracing::debug!("Trip {} already has provider info, ignoring update", self.trip_id);
        }
    }

    /// The first customer position only takes effect with the next provider
    /// sample. A later correction recomputes right away against the latest
    /// provider position.
    fn set_customer_position(&mut self, position: Position) -> Vec<SessionEffect> {
        let previous = self.customer_position.replace(position);

        match (previous, self.provider_position) {
            (Some(previous), Some(provider)) if previous != position => {
                tracing::info!("Trip {}: customer position corrected", self.trip_id);
                let snap = self.request_road_snap(provider, position);
                self.recompute(provider, position);
                vec![snap]
            }
            _ => Vec::new(),
        }
    }

    /// Adopts what the relay knows beyond this session: provider info, samples
    /// sent while this side was away, and ride time. The traveled route only
    /// grows, so a snapshot can extend it but never rewrite it.
    fn catch_up(&mut self, snapshot: &TripSnapshot) -> Vec<SessionEffect> {
        if let Some(provider) = &snapshot.provider {
            self.adopt_provider(provider);
        }
        self.ride_elapsed_minutes = self.ride_elapsed_minutes.max(snapshot.ride_elapsed_minutes);

        let known = self.route.traveled().len();
        let missed = snapshot.traveled_route.get(known..).unwrap_or_default();
        let Some(latest) = missed.last() else {
            return Vec::new();
        };

        tracing::info!("Trip {}: caught up on {} samples", self.trip_id, missed.len());
        for point in missed {
            self.route.append(*point);
        }

        self.track_provider(latest.position, true)
    }

    fn accept_provider_position(&mut self, position: Position, road_snap: bool) -> Vec<SessionEffect> {
        self.route.append(TrackPoint::now(position));
        self.track_provider(position, road_snap)
    }

    fn track_provider(&mut self, position: Position, road_snap: bool) -> Vec<SessionEffect> {
        let mut effects = Vec::new();

        self.provider_position = Some(position);

        if self.status == TripStatus::AwaitingLocation {
            tracing::info!("Trip {} is now active", self.trip_id);
            self.status = TripStatus::Active;
        }

        if !self.ride_timer_running {
            self.ride_timer_running = true;
            effects.push(SessionEffect::StartRideTimer);
        }

        if let Some(customer) = self.customer_position {
            if road_snap {
                effects.push(self.request_road_snap(position, customer));
            }
            self.recompute(position, customer);
        }

        effects
    }

    fn request_road_snap(&mut self, from: Position, to: Position) -> SessionEffect {
        SessionEffect::RequestRoadSnap {
            ticket: self.route.begin_road_snap(),
            from,
            to,
        }
    }

    fn recompute(&mut self, provider: Position, customer: Position) {
        self.distance_km = geo_math::distance_km(&provider, &customer);
        self.eta_minutes = geo_math::eta_minutes_at(self.distance_km, self.average_speed_kmh);
        tracing::debug!(
            "Trip {}: distance {:.2} km, ETA {} min",
            self.trip_id,
            self.distance_km,
            self.eta_minutes
        );
    }

    fn end(&mut self) -> Vec<SessionEffect> {
        tracing::info!("Trip {} ended", self.trip_id);
        self.status = TripStatus::Ended;

        if self.ride_timer_running {
            self.ride_timer_running = false;
            vec![SessionEffect::StopRideTimer]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProviderStartPayload;

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng).unwrap()
    }

    fn t1() -> TripId {
        TripId::new("T1")
    }

    fn provider_start() -> TripEvent {
        TripEvent::ProviderStart(ProviderStartPayload {
            trip_id: t1(),
            provider: ProviderInfo {
                name: "John Doe".into(),
                vehicle: "Toyota Camry - ABC123".into(),
            },
        })
    }

    #[test]
    fn customer_joins_then_provider_moves() {
        let mut session = TripSession::new(t1());
        let customer = pos(11.8390, 75.5685);

        session.apply(&TripEvent::CustomerJoin(t1())).unwrap();
        session.apply(&TripEvent::customer_location(t1(), customer)).unwrap();
        assert_eq!(session.status(), TripStatus::AwaitingLocation);

        session.apply(&provider_start()).unwrap();
        assert_eq!(session.status(), TripStatus::AwaitingLocation);

        let first = pos(40.7580, -73.9855);
        let effects = session.apply(&TripEvent::provider_location(t1(), first)).unwrap();
        assert_eq!(session.status(), TripStatus::Active);
        assert_eq!(session.traveled_route().len(), 1);
        assert!(session.distance_km() > 0.0);
        assert_eq!(session.distance_km(), geo_math::distance_km(&first, &customer));
        assert!(effects.contains(&SessionEffect::StartRideTimer));
        assert!(effects.iter().any(|e| matches!(e, SessionEffect::RequestRoadSnap { from, to, .. } if *from == first && *to == customer)));

        let second = pos(40.7128, -74.0060);
        let effects = session.apply(&TripEvent::provider_location(t1(), second)).unwrap();
        assert_eq!(session.traveled_route().len(), 2);
        assert_eq!(session.distance_km(), geo_math::distance_km(&second, &customer));
        assert_eq!(session.eta_minutes(), geo_math::eta_minutes(session.distance_km()));
        assert!(!effects.contains(&SessionEffect::StartRideTimer));
    }

    #[test]
    fn distance_shrinks_when_provider_approaches() {
        let mut session = TripSession::new(t1());
        session.apply(&TripEvent::customer_location(t1(), pos(40.7128, -74.0060))).unwrap();

        session.apply(&TripEvent::provider_location(t1(), pos(40.7580, -73.9855))).unwrap();
        let far = session.distance_km();
        let far_eta = session.eta_minutes();

        session.apply(&TripEvent::provider_location(t1(), pos(40.7354, -73.9957))).unwrap();
        assert!(session.distance_km() < far);
        assert!(session.eta_minutes() <= far_eta);
    }

    #[test]
    fn provider_before_customer_keeps_telemetry_at_zero() {
        let mut session = TripSession::new(t1());
        let effects = session.apply(&TripEvent::provider_location(t1(), pos(40.7580, -73.9855))).unwrap();

        assert_eq!(effects, vec![SessionEffect::StartRideTimer]);
        assert_eq!(session.traveled_route().len(), 1);
        assert_eq!(session.distance_km(), 0.0);

        // No retroactive computation against the stale provider sample
        let effects = session.apply(&TripEvent::customer_location(t1(), pos(40.7128, -74.0060))).unwrap();
        assert!(effects.is_empty());
        assert_eq!(session.distance_km(), 0.0);
        assert_eq!(session.eta_minutes(), 0);

        session.apply(&TripEvent::provider_location(t1(), pos(40.7300, -74.0000))).unwrap();
        assert!(session.distance_km() > 0.0);
    }

    #[test]
    fn customer_correction_recomputes_immediately() {
        let mut session = TripSession::new(t1());
        session.apply(&TripEvent::customer_location(t1(), pos(40.7128, -74.0060))).unwrap();
        let provider = pos(40.7580, -73.9855);
        session.apply(&TripEvent::provider_location(t1(), provider)).unwrap();

        let corrected = pos(40.7000, -74.0100);
        let effects = session.apply(&TripEvent::customer_location(t1(), corrected)).unwrap();
        assert_eq!(session.distance_km(), geo_math::distance_km(&provider, &corrected));
        assert!(matches!(effects.as_slice(), [SessionEffect::RequestRoadSnap { .. }]));
        assert_eq!(session.traveled_route().len(), 1);
    }

    #[test]
    fn location_update_does_not_request_road_snap() {
        let mut session = TripSession::new(t1());
        session.apply(&TripEvent::customer_location(t1(), pos(40.7128, -74.0060))).unwrap();

        let update = TripEvent::LocationUpdate(crate::protocol::LocationPayload {
            trip_id: t1(),
            position: pos(40.7580, -73.9855),
        });
        let effects = session.apply(&update).unwrap();
        assert_eq!(effects, vec![SessionEffect::StartRideTimer]);
        assert!(session.distance_km() > 0.0);
    }

    #[test]
    fn ended_session_rejects_everything() {
        let mut session = TripSession::new(t1());
        session.apply(&TripEvent::customer_location(t1(), pos(11.8390, 75.5685))).unwrap();
        session.apply(&TripEvent::provider_location(t1(), pos(40.7580, -73.9855))).unwrap();
        let ticket = match session.apply(&TripEvent::provider_location(t1(), pos(40.7128, -74.0060))).unwrap().as_slice() {
            [SessionEffect::RequestRoadSnap { ticket, .. }] => *ticket,
            other => panic!("unexpected effects {other:?}"),
        };

        let effects = session.apply(&TripEvent::TripEnd(t1())).unwrap();
        assert_eq!(effects, vec![SessionEffect::StopRideTimer]);
        assert_eq!(session.status(), TripStatus::Ended);

        let before = session.snapshot();
        let err = session.apply(&TripEvent::provider_location(t1(), pos(1.0, 1.0))).unwrap_err();
        assert_eq!(err, TrackerError::SessionEnded(t1()));
        assert!(session.apply(&provider_start()).is_err());
        assert!(session.apply(&TripEvent::TripEnded(t1())).is_err());
        assert!(!session.tick_ride_timer());
        assert_eq!(session.apply_road_snap(ticket, Ok(vec![pos(2.0, 2.0)])), SnapOutcome::Superseded);
        session.set_link(LinkState::Disconnected);

        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn ride_timer_counts_only_with_provider_position() {
        let mut session = TripSession::new(t1());
        assert!(!session.tick_ride_timer());

        session.apply(&TripEvent::provider_location(t1(), pos(1.0, 1.0))).unwrap();
        assert!(session.tick_ride_timer());
        assert!(session.tick_ride_timer());
        assert_eq!(session.ride_elapsed_minutes(), 2);
    }

    #[test]
    fn events_for_other_trips_are_rejected() {
        let mut session = TripSession::new(t1());
        let err = session.apply(&TripEvent::TripEnd(TripId::new("T2"))).unwrap_err();
        assert!(matches!(err, TrackerError::TripMismatch { .. }));
        assert_eq!(session.status(), TripStatus::AwaitingLocation);
    }

    #[test]
    fn provider_info_is_set_once() {
        let mut session = TripSession::new(t1());
        session.apply(&provider_start()).unwrap();

        let other = TripEvent::ProviderStart(ProviderStartPayload {
            trip_id: t1(),
            provider: ProviderInfo {
                name: "Someone Else".into(),
                vehicle: "Bike".into(),
            },
        });
        session.apply(&other).unwrap();
        assert_eq!(session.provider().unwrap().name, "John Doe");
    }

    #[test]
    fn trip_data_fills_in_missed_samples() {
        let customer = pos(40.7128, -74.0060);
        let mut relay_side = TripSession::new(t1());
        relay_side.apply(&provider_start()).unwrap();
        for lat in [40.7580, 40.7500, 40.7400, 40.7300] {
            relay_side.apply(&TripEvent::provider_location(t1(), pos(lat, -73.9900))).unwrap();
        }
        relay_side.tick_ride_timer();

        let mut session = TripSession::new(t1());
        session.apply(&TripEvent::customer_location(t1(), customer)).unwrap();
        session.apply(&TripEvent::provider_location(t1(), pos(40.7580, -73.9900))).unwrap();

        let effects = session.apply(&TripEvent::TripData(Box::new(relay_side.snapshot()))).unwrap();
        let latest = pos(40.7300, -73.9900);

        assert_eq!(session.traveled_route().len(), 4);
        assert_eq!(&session.traveled_route()[1..], &relay_side.traveled_route()[1..]);
        assert_eq!(session.provider_position(), Some(latest));
        assert_eq!(session.distance_km(), geo_math::distance_km(&latest, &customer));
        assert_eq!(session.eta_minutes(), geo_math::eta_minutes(session.distance_km()));
        assert_eq!(session.ride_elapsed_minutes(), 1);
        assert_eq!(session.provider().unwrap().name, "John Doe");
        assert!(matches!(effects.as_slice(), [SessionEffect::RequestRoadSnap { from, .. }] if *from == latest));

        // Nothing new the second time around
        let effects = session.apply(&TripEvent::TripData(Box::new(relay_side.snapshot()))).unwrap();
        assert!(effects.is_empty());
        assert_eq!(session.traveled_route().len(), 4);
    }

    #[test]
    fn trip_data_before_any_fix_activates_the_session() {
        let mut relay_side = TripSession::new(t1());
        relay_side.apply(&TripEvent::provider_location(t1(), pos(40.7580, -73.9855))).unwrap();

        let mut session = TripSession::new(t1());
        let effects = session.apply(&TripEvent::TripData(Box::new(relay_side.snapshot()))).unwrap();

        assert_eq!(session.status(), TripStatus::Active);
        assert_eq!(effects, vec![SessionEffect::StartRideTimer]);
        assert_eq!(session.distance_km(), 0.0);
    }

    #[test]
    fn invalid_speed_is_rejected() {
        assert!(TripSession::with_speed(t1(), -1.0).is_err());
        assert!(TripSession::with_speed(t1(), 50.0).is_ok());
    }
}
