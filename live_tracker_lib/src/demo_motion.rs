use crate::{error::TrackerError, position::Position};

pub const DEMO_ORIGIN: Position = Position::from_trusted(40.7580, -73.9855);
pub const DEMO_DESTINATION: Position = Position::from_trusted(40.7128, -74.0060);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Running,
    Finished,
}

/// Synthetic provider movement: a straight walk from `origin` towards
/// `destination` in `total_steps` equal increments. Emits fractions
/// `0/N .. (N-1)/N`, then finishes. Fully deterministic.
#[derive(Debug, Clone)]
pub struct DemoMotionGenerator {
    origin: Position,
    destination: Position,
    total_steps: u32,
    step: u32,
    state: MotionState,
}

impl DemoMotionGenerator {
    pub fn new(origin: Position, destination: Position, total_steps: u32) -> Result<Self, TrackerError> {
        if total_steps == 0 {
            return Err(TrackerError::InvalidStepCount);
        }

        Ok(Self {
            origin,
            destination,
            total_steps,
            step: 0,
            state: MotionState::Idle,
        })
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// Starts a run from the origin. Restarting a finished run begins again at step 0.
    pub fn start(&mut self) {
        if self.state != MotionState::Running {
            self.step = 0;
            self.state = MotionState::Running;
        }
    }

    /// Abandons the run without completing it.
    pub fn cancel(&mut self) {
        self.step = 0;
        self.state = MotionState::Idle;
    }

    /// One tick of the cadence. Returns `None` unless running.
    pub fn tick(&mut self) -> Option<Position> {
        if self.state != MotionState::Running {
            return None;
        }

        if self.step >= self.total_steps {
            self.state = MotionState::Finished;
            return None;
        }

        let fraction = self.step as f64 / self.total_steps as f64;
        let position = self.origin.lerp(&self.destination, fraction);
        self.step += 1;

        if self.step >= self.total_steps {
            self.state = MotionState::Finished;
        }

        Some(position)
    }
}
