use live_tracker_lib::{channel::LocalHub, config::TrackerConfig};

pub struct ServerState {
    // Every WebSocket peer is attached to this hub.
    pub hub: LocalHub,
    pub config: TrackerConfig,
}
