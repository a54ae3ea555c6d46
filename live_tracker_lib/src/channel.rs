use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};

use crate::{
    error::TrackerError,
    protocol::{EventKind, TripEvent, TripId, TripSnapshot},
    relay::{Audience, TripRelay},
    session::SessionEffect,
    task::ScopedTask,
};

/// What a subscriber sees: lifecycle changes of the link, or an event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotice {
    Connected,
    Disconnected,
    ConnectError(String),
    Event(TripEvent),
}

/// Bidirectional publish/subscribe link between one peer and the relay.
/// Events from one sender are delivered in the order they were emitted.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn connect(&self) -> Result<(), TrackerError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Fails with [`TrackerError::ChannelUnavailable`] while disconnected. The
    /// event is not queued; the caller decides when to retry.
    async fn emit(&self, event: TripEvent) -> Result<(), TrackerError>;

    /// A new subscription with no events registered. Lifecycle notices are
    /// always delivered.
    fn subscribe(&self) -> Subscription;
}

/// Fan-out to every live subscription of one peer. Each subscription has its
/// own unbounded queue, so a burst is never cut short for a slow reader.
#[derive(Clone, Default)]
pub struct Subscribers {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<ChannelNotice>>>>,
}

impl Subscribers {
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        Subscription::new(rx)
    }

    /// Delivers to every subscription still alive and forgets the dropped ones.
    pub fn send(&self, notice: &ChannelNotice) {
        self.lock().retain(|tx| tx.send(notice.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<ChannelNotice>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Subscription {
    notices: mpsc::UnboundedReceiver<ChannelNotice>,
    kinds: HashSet<EventKind>,
}

impl Subscription {
    pub fn new(notices: mpsc::UnboundedReceiver<ChannelNotice>) -> Self {
        Self {
            notices,
            kinds: HashSet::new(),
        }
    }

    pub fn on(&mut self, kind: EventKind) -> &mut Self {
        self.kinds.insert(kind);
        self
    }

    pub fn off(&mut self, kind: EventKind) -> &mut Self {
        self.kinds.remove(&kind);
        self
    }

    pub fn on_all(&mut self) -> &mut Self {
        self.kinds.extend(EventKind::ALL);
        self
    }

    pub fn is_on(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Next notice, skipping events nobody registered for. `None` once the
    /// channel is gone for good.
    pub async fn recv(&mut self) -> Option<ChannelNotice> {
        loop {
            match self.notices.recv().await? {
                ChannelNotice::Event(event) => {
                    if self.kinds.contains(&event.kind()) {
                        return Some(ChannelNotice::Event(event));
                    }
                }
                notice => return Some(notice),
            }
        }
    }
}

struct Peer {
    subscribers: Subscribers,
    connected: Arc<AtomicBool>,
    rooms: HashSet<TripId>,
}

struct HubInner {
    relay: TripRelay,
    peers: HashMap<u64, Peer>,
    ride_timers: HashMap<TripId, ScopedTask>,
    accepting: bool,
}

impl HubInner {
    fn in_use(&self, trip_id: &TripId) -> bool {
        self.peers.values().any(|peer| peer.rooms.contains(trip_id))
    }
}

/// In-process channel backend. Peers obtained from [`LocalHub::channel`]
/// talk to a shared [`TripRelay`]; the server exposes the same hub over
/// WebSocket. The hub also runs the ride timer of every active trip, so
/// snapshots served from here count ride minutes too.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<Mutex<HubInner>>,
    next_peer: Arc<AtomicU64>,
}

impl LocalHub {
    pub fn new(relay: TripRelay) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                relay,
                peers: HashMap::new(),
                ride_timers: HashMap::new(),
                accepting: true,
            })),
            next_peer: Arc::new(AtomicU64::new(1)),
        }
    }

    /// A fresh, not yet connected peer.
    pub fn channel(&self) -> LocalChannel {
        LocalChannel {
            hub: self.clone(),
            id: self.next_peer.fetch_add(1, Ordering::Relaxed),
            subscribers: Subscribers::default(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn snapshot(&self, trip_id: &TripId) -> Option<TripSnapshot> {
        self.lock().relay.snapshot(trip_id)
    }

    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn trip_count(&self) -> usize {
        self.lock().relay.trip_count()
    }

    /// When switched off, every peer is dropped and new connections are refused.
    pub fn set_accepting(&self, accepting: bool) {
        let mut inner = self.lock();
        inner.accepting = accepting;

        if !accepting {
            for (_, peer) in inner.peers.drain() {
                peer.connected.store(false, Ordering::Release);
                peer.subscribers.send(&ChannelNotice::Disconnected);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        lock_inner(&self.inner)
    }

    fn attach(&self, channel: &LocalChannel) -> Result<(), TrackerError> {
        let mut inner = self.lock();
        if !inner.accepting {
            channel
                .subscribers
                .send(&ChannelNotice::ConnectError("hub is not accepting connections".into()));
            return Err(TrackerError::ChannelUnavailable);
        }

        inner.peers.entry(channel.id).or_insert_with(|| Peer {
            subscribers: channel.subscribers.clone(),
            connected: channel.connected.clone(),
            rooms: HashSet::new(),
        });
        channel.connected.store(true, Ordering::Release);
        channel.subscribers.send(&ChannelNotice::Connected);

        tracing::debug!("Peer {} connected", channel.id);
        Ok(())
    }

    /// Removes the peer. Trips it was the last one waiting on are forgotten
    /// while no provider sample has arrived for them yet.
    fn detach(&self, id: u64) {
        let mut inner = self.lock();
        let Some(peer) = inner.peers.remove(&id) else {
            return;
        };

        peer.connected.store(false, Ordering::Release);
        peer.subscribers.send(&ChannelNotice::Disconnected);
        tracing::debug!("Peer {} disconnected", id);

        for trip_id in &peer.rooms {
            if !inner.in_use(trip_id) && inner.relay.forget_idle(trip_id) {
                inner.ride_timers.remove(trip_id);
            }
        }
    }

    fn dispatch(&self, from: u64, event: TripEvent) -> Result<(), TrackerError> {
        let mut inner = self.lock();
        if !inner.peers.contains_key(&from) {
            return Err(TrackerError::ChannelUnavailable);
        }

        let kind = event.kind();
        let trip_id = event.trip_id().clone();
        let outcome = match inner.relay.handle(event) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("Dropping {} from peer {}: {}", kind, from, err);
                return Ok(());
            }
        };

        for effect in &outcome.effects {
            match effect {
                SessionEffect::StartRideTimer => {
                    let ticker = ride_ticker(Arc::downgrade(&self.inner), trip_id.clone(), inner.relay.ride_tick());
                    inner.ride_timers.insert(trip_id.clone(), ScopedTask::spawn(ticker));
                }
                SessionEffect::StopRideTimer => {
                    inner.ride_timers.remove(&trip_id);
                }
                SessionEffect::RequestRoadSnap { .. } => {}
            }
        }

        if let Some(trip_id) = &outcome.join {
            if let Some(peer) = inner.peers.get_mut(&from) {
                peer.rooms.insert(trip_id.clone());
            }
        }

        for delivery in outcome.deliveries {
            let trip_id = delivery.event.trip_id().clone();
            let notice = ChannelNotice::Event(delivery.event);

            for (id, peer) in &inner.peers {
                let wanted = match delivery.audience {
                    Audience::Sender => *id == from,
                    Audience::Room => peer.rooms.contains(&trip_id),
                    Audience::RoomExceptSender => *id != from && peer.rooms.contains(&trip_id),
                };

                if wanted {
                    peer.subscribers.send(&notice);
                }
            }
        }

        Ok(())
    }
}

fn lock_inner(inner: &Mutex<HubInner>) -> MutexGuard<'_, HubInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts ride minutes for one trip until it ends or the hub goes away.
async fn ride_ticker(hub: Weak<Mutex<HubInner>>, trip_id: TripId, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        interval.tick().await;

        let Some(inner) = hub.upgrade() else {
            break;
        };
        if !lock_inner(&inner).relay.tick_ride_timer(&trip_id) {
            break;
        }
    }
}

/// One peer's handle on a [`LocalHub`]. Dropping it disconnects.
pub struct LocalChannel {
    hub: LocalHub,
    id: u64,
    subscribers: Subscribers,
    connected: Arc<AtomicBool>,
}

impl LocalChannel {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn connect(&self) -> Result<(), TrackerError> {
        self.hub.attach(self)
    }

    async fn disconnect(&self) {
        self.hub.detach(self.id);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn emit(&self, event: TripEvent) -> Result<(), TrackerError> {
        if !self.is_connected() {
            return Err(TrackerError::ChannelUnavailable);
        }

        self.hub.dispatch(self.id, event)
    }

    fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}
