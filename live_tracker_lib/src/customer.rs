use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
    time::Instant,
};

use crate::{
    channel::{Channel, ChannelNotice, Subscription},
    config::TrackerConfig,
    error::TrackerError,
    position::Position,
    protocol::{EventKind, LinkState, TripEvent, TripId, TripSnapshot, TripStatus},
    route::{RoadRouter, SnapOutcome, SnapTicket},
    session::{SessionEffect, TripSession},
    task::ScopedTask,
};

type SnapResult = (SnapTicket, Result<Vec<Position>, TrackerError>);

const SNAP_BUFFER: usize = 16;

/// The customer side of a trip: owns the [`TripSession`] and keeps observers
/// supplied with fresh snapshots until the trip ends or the tracker is dropped.
pub struct CustomerTracker {
    trip_id: TripId,
    snapshots: watch::Receiver<TripSnapshot>,
    _driver: ScopedTask,
}

impl CustomerTracker {
    pub async fn join(
        channel: Arc<dyn Channel>,
        trip_id: TripId,
        customer_position: Position,
        router: Option<Arc<dyn RoadRouter>>,
        config: &TrackerConfig,
    ) -> Result<Self, TrackerError> {
        if !channel.is_connected() {
            return Err(TrackerError::ChannelUnavailable);
        }

        let mut session = TripSession::with_speed(trip_id.clone(), config.average_speed_kmh)?;

        let mut subscription = channel.subscribe();
        subscription
            .on(EventKind::TripData)
            .on(EventKind::LocationUpdate)
            .on(EventKind::ProviderLocation)
            .on(EventKind::TripEnded);

        let location = TripEvent::customer_location(trip_id.clone(), customer_position);
        channel.emit(TripEvent::CustomerJoin(trip_id.clone())).await?;
        channel.emit(location.clone()).await?;
        session.apply(&location)?;

        tracing::info!(
            "Customer joined trip {} at lat {:.5}, lng {:.5}",
            trip_id,
            customer_position.lat(),
            customer_position.lng()
        );

        let (snapshot_tx, snapshots) = watch::channel(session.snapshot());
        let driver = Driver {
            channel,
            session,
            customer_position,
            router,
            ride_tick: config.ride_tick,
            snapshots: snapshot_tx,
            ride_timer: None,
            lookups: JoinSet::new(),
        };

        Ok(Self {
            trip_id,
            snapshots,
            _driver: ScopedTask::spawn(driver.run(subscription)),
        })
    }

    pub fn trip_id(&self) -> &TripId {
        &self.trip_id
    }

    pub fn snapshot(&self) -> TripSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn observe(&self) -> watch::Receiver<TripSnapshot> {
        self.snapshots.clone()
    }

    /// Resolves with the final snapshot once the trip has ended. Also returns
    /// when the driver stopped early because the channel went away.
    pub async fn ended(&self) -> TripSnapshot {
        let mut snapshots = self.snapshots.clone();
        if let Ok(snapshot) = snapshots.wait_for(|snapshot| snapshot.status == TripStatus::Ended).await {
            return snapshot.clone();
        }

        let last = snapshots.borrow().clone();
        last
    }
}

struct Driver {
    channel: Arc<dyn Channel>,
    session: TripSession,
    customer_position: Position,
    router: Option<Arc<dyn RoadRouter>>,
    ride_tick: Duration,
    snapshots: watch::Sender<TripSnapshot>,
    ride_timer: Option<ScopedTask>,
    lookups: JoinSet<()>,
}

impl Driver {
    async fn run(mut self, mut subscription: Subscription) {
        let (snap_tx, mut snap_rx) = mpsc::channel::<SnapResult>(SNAP_BUFFER);
        let (tick_tx, mut tick_rx) = mpsc::channel::<()>(1);

        loop {
            tokio::select! {
                notice = subscription.recv() => {
                    let Some(notice) = notice else {
                        tracing::warn!("Channel for trip {} closed", self.session.trip_id());
                        break;
                    };
                    self.on_notice(notice, &snap_tx, &tick_tx).await;
                }
                Some(()) = tick_rx.recv() => {
                    if self.session.tick_ride_timer() {
                        tracing::debug!(
                            "Trip {}: ride time {} min",
                            self.session.trip_id(),
                            self.session.ride_elapsed_minutes()
                        );
                    }
                }
                Some((ticket, result)) = snap_rx.recv() => {
                    if self.session.apply_road_snap(ticket, result) == SnapOutcome::Superseded {
                        tracing::debug!("Discarded stale road snap for trip {}", self.session.trip_id());
                    }
                }
                Some(_) = self.lookups.join_next(), if !self.lookups.is_empty() => continue,
            }

            self.publish();

            if self.session.is_ended() {
                break;
            }
        }

        self.ride_timer = None;
        self.lookups.abort_all();
        self.publish();
    }

    async fn on_notice(&mut self, notice: ChannelNotice, snap_tx: &mpsc::Sender<SnapResult>, tick_tx: &mpsc::Sender<()>) {
        match notice {
            ChannelNotice::Connected => {
                self.session.set_link(LinkState::Connected);
                rejoin(self.channel.as_ref(), self.session.trip_id(), self.customer_position).await;
            }
            ChannelNotice::Disconnected => {
                tracing::warn!("Trip {}: channel disconnected", self.session.trip_id());
                self.session.set_link(LinkState::Disconnected);
            }
            ChannelNotice::ConnectError(message) => {
                tracing::warn!("Trip {}: connect error: {}", self.session.trip_id(), message);
                self.session.set_link(LinkState::Error(message));
            }
            ChannelNotice::Event(event) => {
                if event.trip_id() != self.session.trip_id() {
                    return;
                }

                match self.session.apply(&event) {
                    Ok(effects) => self.run_effects(effects, snap_tx, tick_tx),
                    Err(err) => tracing::debug!("Ignoring {}: {}", event.kind(), err),
                }
            }
        }
    }

    fn run_effects(&mut self, effects: Vec<SessionEffect>, snap_tx: &mpsc::Sender<SnapResult>, tick_tx: &mpsc::Sender<()>) {
        for effect in effects {
            match effect {
                SessionEffect::RequestRoadSnap { ticket, from, to } => {
                    let Some(router) = self.router.clone() else {
                        continue;
                    };
                    let results = snap_tx.clone();
                    self.lookups.spawn(async move {
                        let result = router.route(from, to).await;
                        let _ = results.send((ticket, result)).await;
                    });
                }
                SessionEffect::StartRideTimer => {
                    if self.ride_timer.is_none() {
                        self.ride_timer = Some(ScopedTask::spawn(ride_ticker(self.ride_tick, tick_tx.clone())));
                    }
                }
                SessionEffect::StopRideTimer => self.ride_timer = None,
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

async fn rejoin(channel: &dyn Channel, trip_id: &TripId, customer_position: Position) {
    let location = TripEvent::customer_location(trip_id.clone(), customer_position);

    for event in [TripEvent::CustomerJoin(trip_id.clone()), location] {
        if let Err(err) = channel.emit(event).await {
            tracing::warn!("Could not rejoin trip {}: {}", trip_id, err);
            return;
        }
    }
}

async fn ride_ticker(period: Duration, ticks: mpsc::Sender<()>) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        interval.tick().await;
        if ticks.send(()).await.is_err() {
            break;
        }
    }
}
