use std::time::Duration;

use tokio::{sync::mpsc, time::Instant};

use crate::{
    demo_motion::DemoMotionGenerator,
    error::TrackerError,
    position::TrackPoint,
    task::ScopedTask,
};

const WATCH_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    /// Longest wait for a fix before an error is reported. Watching continues afterwards.
    pub timeout: Duration,
    /// Fixes older than this are discarded. `None` accepts any age.
    pub maximum_age: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            maximum_age: Some(Duration::from_secs(10)),
        }
    }
}

/// A continuous position feed. `watch` starts it; dropping or clearing the
/// returned [`PositionWatch`] stops it.
pub trait PositionSource: Send {
    fn watch(&mut self, options: WatchOptions) -> Result<PositionWatch, TrackerError>;
}

pub struct PositionWatch {
    fixes: mpsc::Receiver<Result<TrackPoint, TrackerError>>,
    _producer: ScopedTask,
}

impl PositionWatch {
    pub fn new(fixes: mpsc::Receiver<Result<TrackPoint, TrackerError>>, producer: ScopedTask) -> Self {
        Self {
            fixes,
            _producer: producer,
        }
    }

    /// Next fix or error. `None` once the source has nothing more to give.
    pub async fn next(&mut self) -> Option<Result<TrackPoint, TrackerError>> {
        self.fixes.recv().await
    }

    /// Stops watching and releases the producer.
    pub fn clear(self) {}
}

/// Feeds a [`DemoMotionGenerator`] on a fixed cadence. The first position
/// arrives one interval after watching starts.
pub struct DemoSource {
    generator: DemoMotionGenerator,
    interval: Duration,
}

impl DemoSource {
    pub fn new(generator: DemoMotionGenerator, interval: Duration) -> Self {
        Self { generator, interval }
    }
}

impl PositionSource for DemoSource {
    fn watch(&mut self, _options: WatchOptions) -> Result<PositionWatch, TrackerError> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let mut motion = self.generator.clone();
        let period = self.interval;

        motion.start();

        let producer = ScopedTask::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;

                let Some(position) = motion.tick() else {
                    break;
                };

                tracing::debug!(
                    "Demo position {}/{} - lat {:.4}, lng {:.4}",
                    motion.step(),
                    motion.total_steps(),
                    position.lat(),
                    position.lng()
                );

                if tx.send(Ok(TrackPoint::now(position))).await.is_err() {
                    break;
                }
            }
            tracing::debug!("Demo motion finished");
        });

        Ok(PositionWatch::new(rx, producer))
    }
}

#[cfg(feature = "nmea")]
pub use nmea_source::NmeaSource;

#[cfg(feature = "nmea")]
mod nmea_source {
    use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
    use nmea::{Nmea, SentenceType};
    use tokio::{
        io::{AsyncBufRead, AsyncBufReadExt},
        sync::mpsc,
        time::Instant,
    };

    use super::{PositionSource, PositionWatch, WatchOptions, WATCH_BUFFER};
    use crate::{error::TrackerError, position::{Position, TrackPoint}, task::ScopedTask};

    /// Real device positions from an NMEA-0183 sentence stream: a serial
    /// device, a gpsd raw socket, or a recorded log.
    pub struct NmeaSource<R> {
        reader: Option<R>,
    }

    impl<R> NmeaSource<R>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        pub fn new(reader: R) -> Self {
            Self {
                reader: Some(reader),
            }
        }
    }

    impl<R> PositionSource for NmeaSource<R>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        fn watch(&mut self, options: WatchOptions) -> Result<PositionWatch, TrackerError> {
            let reader = self.reader.take().ok_or_else(|| {
                TrackerError::PositionSourceError("NMEA stream is already being watched".into())
            })?;

            let (tx, rx) = mpsc::channel(WATCH_BUFFER);
            let producer = ScopedTask::spawn(async move {
                let mut lines = reader.lines();
                let mut nmea = Nmea::default();
                let mut last_fix_time: Option<NaiveTime> = None;
                let mut deadline = Instant::now() + options.timeout;

                loop {
                    let line = match tokio::time::timeout_at(deadline, lines.next_line()).await {
                        Ok(Ok(Some(line))) => line,
                        Ok(Ok(None)) => {
                            let _ = tx.send(Err(TrackerError::PositionSourceError("position stream closed".into()))).await;
                            break;
                        }
                        Ok(Err(err)) => {
                            let _ = tx.send(Err(TrackerError::PositionSourceError(format!("failed to read position stream: {err}")))).await;
                            break;
                        }
                        Err(_) => {
                            deadline = Instant::now() + options.timeout;
                            let timeout = TrackerError::PositionSourceError(format!("no position fix within {:?}", options.timeout));
                            if tx.send(Err(timeout)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    match nmea.parse(trimmed) {
                        Ok(SentenceType::GGA) | Ok(SentenceType::RMC) => {}
                        Ok(_) => continue,
                        Err(err) => {
                            tracing::debug!("Skipping NMEA sentence {:?}: {:?}", trimmed, err);
                            continue;
                        }
                    }

                    let (Some(lat), Some(lng)) = (nmea.latitude, nmea.longitude) else {
                        continue;
                    };

                    // GGA and RMC of the same epoch carry the same fix
                    if nmea.fix_time.is_some() && nmea.fix_time == last_fix_time {
                        continue;
                    }
                    last_fix_time = nmea.fix_time;

                    let now = Utc::now();
                    let timestamp = fix_timestamp(nmea.fix_time, now);
                    if let Some(maximum_age) = options.maximum_age {
                        let too_old = (now - timestamp).to_std().map(|age| age > maximum_age).unwrap_or(false);
                        if too_old {
                            tracing::debug!("Discarding stale fix from {}", timestamp);
                            continue;
                        }
                    }

                    let position = match Position::new(lat, lng) {
                        Ok(position) => position,
                        Err(err) => {
                            tracing::warn!("Ignoring NMEA fix: {err}");
                            continue;
                        }
                    };

                    deadline = Instant::now() + options.timeout;
                    if tx.send(Ok(TrackPoint::new(position, timestamp))).await.is_err() {
                        break;
                    }
                }
            });

            Ok(PositionWatch::new(rx, producer))
        }
    }

    /// NMEA fixes only carry a time of day. Pair it with the current UTC date,
    /// stepping back a day for fixes taken just before midnight.
    fn fix_timestamp(fix_time: Option<NaiveTime>, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(time) = fix_time else {
            return now;
        };

        let timestamp = now.date_naive().and_time(time).and_utc();
        if timestamp > now + TimeDelta::minutes(1) {
            timestamp - TimeDelta::days(1)
        } else {
            timestamp
        }
    }

}

#[cfg(test)]
mod tests {
    use crate::position::Position;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn demo_source_emits_n_fixes_then_closes() {
        let origin = Position::new(40.7580, -73.9855).unwrap();
        let destination = Position::new(40.7128, -74.0060).unwrap();
        let generator = DemoMotionGenerator::new(origin, destination, 20).unwrap();
        let mut source = DemoSource::new(generator, Duration::from_secs(2));

        let started = Instant::now();
        let mut watch = source.watch(WatchOptions::default()).unwrap();

        let first = watch.next().await.unwrap().unwrap();
        assert_eq!(first.position, origin);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_millis(2100));

        let mut count = 1;
        while let Some(fix) = watch.next().await {
            fix.unwrap();
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_a_demo_watch_stops_it() {
        let p = Position::new(1.0, 1.0).unwrap();
        let generator = DemoMotionGenerator::new(p, p, 100).unwrap();
        let mut source = DemoSource::new(generator, Duration::from_millis(10));

        let mut watch = source.watch(WatchOptions::default()).unwrap();
        watch.next().await.unwrap().unwrap();
        watch.clear();

        // A fresh watch restarts from the origin
        let mut watch = source.watch(WatchOptions::default()).unwrap();
        assert_eq!(watch.next().await.unwrap().unwrap().position, p);
    }
}
