use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{
    channel::{Channel, ChannelNotice},
    demo_motion::DemoMotionGenerator,
    error::TrackerError,
    position::Position,
    protocol::{ProviderInfo, ProviderStartPayload, TripEvent, TripId},
    source::{DemoSource, PositionSource, PositionWatch, WatchOptions},
    task::ScopedTask,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    Demo,
    Device,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStatus {
    Idle,
    Tracking(TrackingMode),
    /// The position source failed. The trip stays open; tracking can be restarted.
    Faulted(String),
}

/// Publishes one provider's positions for a trip.
pub struct ProviderTracker {
    channel: Arc<dyn Channel>,
    trip_id: TripId,
    provider: ProviderInfo,
    status: Arc<watch::Sender<ProviderStatus>>,
    pump: Option<ScopedTask>,
}

impl ProviderTracker {
    pub fn new(channel: Arc<dyn Channel>, trip_id: TripId, provider: ProviderInfo) -> Self {
        let (status, _) = watch::channel(ProviderStatus::Idle);
        Self {
            channel,
            trip_id,
            provider,
            status: Arc::new(status),
            pump: None,
        }
    }

    pub fn trip_id(&self) -> &TripId {
        &self.trip_id
    }

    pub fn status(&self) -> watch::Receiver<ProviderStatus> {
        self.status.subscribe()
    }

    pub fn is_tracking(&self) -> bool {
        matches!(*self.status.borrow(), ProviderStatus::Tracking(_))
    }

    pub async fn start_demo(&mut self, generator: DemoMotionGenerator, interval: Duration) -> Result<(), TrackerError> {
        let source = DemoSource::new(generator, interval);
        self.start(source, WatchOptions::default(), TrackingMode::Demo).await
    }

    pub async fn start_watching<S: PositionSource>(
        &mut self,
        source: S,
        options: WatchOptions,
    ) -> Result<(), TrackerError> {
        self.start(source, options, TrackingMode::Device).await
    }

    async fn start<S: PositionSource>(
        &mut self,
        mut source: S,
        options: WatchOptions,
        mode: TrackingMode,
    ) -> Result<(), TrackerError> {
        if !self.channel.is_connected() {
            return Err(TrackerError::ChannelUnavailable);
        }

        // Only one source feeds a trip at a time
        self.pump = None;

        self.channel.emit(self.start_event()).await?;
        let watch = source.watch(options)?;

        let pump = Pump {
            channel: self.channel.clone(),
            trip_id: self.trip_id.clone(),
            start: self.start_event(),
            status: self.status.clone(),
            pending: VecDeque::new(),
        };

        self.pump = Some(ScopedTask::spawn(pump.run(watch)));
        self.status.send_replace(ProviderStatus::Tracking(mode));

        tracing::info!("Provider {} tracking trip {} ({:?})", self.provider.name, self.trip_id, mode);
        Ok(())
    }

    /// Releases the position source and closes the trip for everyone in it.
    pub async fn stop(&mut self) -> Result<(), TrackerError> {
        self.pump = None;
        self.status.send_replace(ProviderStatus::Idle);

        tracing::info!("Provider {} ending trip {}", self.provider.name, self.trip_id);
        self.channel.emit(TripEvent::TripEnd(self.trip_id.clone())).await
    }

    fn start_event(&self) -> TripEvent {
        TripEvent::ProviderStart(ProviderStartPayload {
            trip_id: self.trip_id.clone(),
            provider: self.provider.clone(),
        })
    }
}

struct Pump {
    channel: Arc<dyn Channel>,
    trip_id: TripId,
    start: TripEvent,
    status: Arc<watch::Sender<ProviderStatus>>,
    pending: VecDeque<Position>,
}

impl Pump {
    async fn run(mut self, mut watch: PositionWatch) {
        let mut notices = self.channel.subscribe();
        let mut channel_open = true;

        loop {
            tokio::select! {
                fix = watch.next() => match fix {
                    Some(Ok(point)) => {
                        self.pending.push_back(point.position);
                        self.flush().await;
                    }
                    Some(Err(err)) => {
                        tracing::warn!("Position source for trip {} failed: {}", self.trip_id, err);
                        self.status.send_replace(ProviderStatus::Faulted(err.to_string()));
                        break;
                    }
                    None => {
                        tracing::debug!("Position source for trip {} finished", self.trip_id);
                        self.status.send_replace(ProviderStatus::Idle);
                        break;
                    }
                },
                notice = notices.recv(), if channel_open => match notice {
                    Some(ChannelNotice::Connected) => self.rejoin().await,
                    Some(_) => {}
                    None => channel_open = false,
                },
            }
        }

        watch.clear();

        // Samples taken while offline still go out once the link is back
        while channel_open && !self.pending.is_empty() {
            match notices.recv().await {
                Some(ChannelNotice::Connected) => self.rejoin().await,
                Some(_) => {}
                None => channel_open = false,
            }
        }

        if !self.pending.is_empty() {
            tracing::warn!("{} samples for trip {} were never delivered", self.pending.len(), self.trip_id);
        }
    }

    async fn rejoin(&mut self) {
        if let Err(err) = self.channel.emit(self.start.clone()).await {
            tracing::warn!("Could not rejoin trip {}: {}", self.trip_id, err);
            return;
        }
        self.flush().await;
    }

    async fn flush(&mut self) {
        while let Some(position) = self.pending.front().copied() {
            match self
                .channel
                .emit(TripEvent::provider_location(self.trip_id.clone(), position))
                .await
            {
                Ok(()) => {
                    self.pending.pop_front();
                    tracing::debug!(
                        "Sent position for trip {}: lat {:.5}, lng {:.5}",
                        self.trip_id,
                        position.lat(),
                        position.lng()
                    );
                }
                Err(TrackerError::ChannelUnavailable) => {
                    tracing::debug!("Channel unavailable, {} samples waiting", self.pending.len());
                    return;
                }
                Err(err) => {
                    tracing::warn!("Dropping sample for trip {}: {}", self.trip_id, err);
                    self.pending.pop_front();
                }
            }
        }
    }
}
