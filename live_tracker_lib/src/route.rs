use async_trait::async_trait;

use crate::{
    error::TrackerError,
    position::{Position, TrackPoint},
};

/// External road-routing lookup. Implementations may fail freely; failures
/// never reach the session state.
#[async_trait]
pub trait RoadRouter: Send + Sync {
    async fn route(&self, from: Position, to: Position) -> Result<Vec<Position>, TrackerError>;
}

/// Identifies one road-snap request. Tickets are issued in strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapOutcome {
    Applied,
    Superseded,
    Failed,
}

/// Traveled path plus the derived road-snapped overlay, tracked independently.
#[derive(Debug, Clone, Default)]
pub struct RouteAccumulator {
    traveled: Vec<TrackPoint>,
    road: Vec<Position>,
    last_ticket: u64,
}

impl RouteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sample is kept, repeats included.
    pub fn append(&mut self, point: TrackPoint) {
        self.traveled.push(point);
    }

    pub fn traveled(&self) -> &[TrackPoint] {
        &self.traveled
    }

    pub fn road(&self) -> &[Position] {
        &self.road
    }

    pub fn begin_road_snap(&mut self) -> SnapTicket {
        self.last_ticket += 1;
        SnapTicket(self.last_ticket)
    }

    pub fn apply_road_snap(
        &mut self,
        ticket: SnapTicket,
        result: Result<Vec<Position>, TrackerError>,
    ) -> SnapOutcome {
        if ticket.0 != self.last_ticket {
            tracing::debug!("Discarding superseded road snap {:?}, latest is {}", ticket, self.last_ticket);
            return SnapOutcome::Superseded;
        }

        match result {
            Ok(polyline) if !polyline.is_empty() => {
                self.road = polyline;
                SnapOutcome::Applied
            }
            Ok(_) => {
                tracing::warn!("Road snap returned an empty polyline, keeping previous route");
                SnapOutcome::Failed
            }
            Err(err) => {
                tracing::warn!("Road snap failed, keeping previous route: {err}");
                SnapOutcome::Failed
            }
        }
    }
}
