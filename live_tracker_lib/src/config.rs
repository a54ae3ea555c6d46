use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    demo_motion::{DemoMotionGenerator, DEMO_DESTINATION, DEMO_ORIGIN},
    error::TrackerError,
    geo_math::{self, DEFAULT_AVERAGE_SPEED_KMH},
    position::Position,
    source::WatchOptions,
};

pub const ENV_PREFIX: &str = "LIVE_TRACKER_";

pub const DEFAULT_OSRM_URL: &str = "https://router.project-osrm.org";

#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    pub origin: Position,
    pub destination: Position,
    pub steps: u32,
    pub interval: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            origin: DEMO_ORIGIN,
            destination: DEMO_DESTINATION,
            steps: 20,
            interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_OSRM_URL.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub average_speed_kmh: f64,
    pub ride_tick: Duration,
    pub demo: DemoConfig,
    pub gps: WatchOptions,
    /// NMEA sentence source for real positions. Demo motion when unset.
    pub gps_device: Option<PathBuf>,
    pub routing: RoutingConfig,
    pub bind: SocketAddr,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            ride_tick: Duration::from_secs(60),
            demo: DemoConfig::default(),
            gps: WatchOptions::default(),
            gps_device: None,
            routing: RoutingConfig::default(),
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `LIVE_TRACKER_*` environment variables.
    pub fn from_env() -> Result<Self, TrackerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TrackerError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(speed) = var("AVERAGE_SPEED_KMH") {
            config.average_speed_kmh = geo_math::validate_speed(parse("AVERAGE_SPEED_KMH", &speed)?)?;
        }
        if let Some(secs) = var("RIDE_TICK_SECS") {
            config.ride_tick = non_zero(Duration::from_secs(parse("RIDE_TICK_SECS", &secs)?), "RIDE_TICK_SECS")?;
        }
        if let Some(steps) = var("DEMO_STEPS") {
            config.demo.steps = parse("DEMO_STEPS", &steps)?;
            if config.demo.steps == 0 {
                return Err(TrackerError::InvalidStepCount);
            }
        }
        if let Some(ms) = var("DEMO_INTERVAL_MS") {
            config.demo.interval = non_zero(Duration::from_millis(parse("DEMO_INTERVAL_MS", &ms)?), "DEMO_INTERVAL_MS")?;
        }
        if let Some(ms) = var("GPS_TIMEOUT_MS") {
            config.gps.timeout = non_zero(Duration::from_millis(parse("GPS_TIMEOUT_MS", &ms)?), "GPS_TIMEOUT_MS")?;
        }
        if let Some(ms) = var("GPS_MAX_AGE_MS") {
            // 0 turns the staleness check off
            let ms: u64 = parse("GPS_MAX_AGE_MS", &ms)?;
            config.gps.maximum_age = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(path) = var("GPS_DEVICE") {
            config.gps_device = Some(PathBuf::from(path));
        }
        if let Some(url) = var("OSRM_URL") {
            config.routing.base_url = url;
        }
        if let Some(secs) = var("OSRM_TIMEOUT_SECS") {
            config.routing.timeout = non_zero(Duration::from_secs(parse("OSRM_TIMEOUT_SECS", &secs)?), "OSRM_TIMEOUT_SECS")?;
        }
        if let Some(flag) = var("ROAD_SNAP") {
            config.routing.enabled = parse_flag("ROAD_SNAP", &flag)?;
        }
        if let Some(bind) = var("BIND") {
            config.bind = parse("BIND", &bind)?;
        }

        Ok(config)
    }

    pub fn demo_generator(&self) -> Result<DemoMotionGenerator, TrackerError> {
        DemoMotionGenerator::new(self.demo.origin, self.demo.destination, self.demo.steps)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, TrackerError> {
    value
        .trim()
        .parse()
        .map_err(|_| TrackerError::Config(format!("{ENV_PREFIX}{name} has invalid value {value:?}")))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, TrackerError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(TrackerError::Config(format!("{ENV_PREFIX}{name} has invalid value {value:?}"))),
    }
}

fn non_zero(duration: Duration, name: &str) -> Result<Duration, TrackerError> {
    if duration.is_zero() {
        Err(TrackerError::Config(format!("{ENV_PREFIX}{name} must be greater than zero")))
    } else {
        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_demo_run() {
        let config = TrackerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.demo.steps, 20);
        assert_eq!(config.demo.interval, Duration::from_secs(2));
        assert_eq!(config.ride_tick, Duration::from_secs(60));
        assert_eq!(config.bind.port(), 3000);
    }

    #[test]
    fn overrides_from_env() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("LIVE_TRACKER_AVERAGE_SPEED_KMH", "45.5"),
            ("LIVE_TRACKER_DEMO_STEPS", "5"),
            ("LIVE_TRACKER_GPS_MAX_AGE_MS", "0"),
            ("LIVE_TRACKER_ROAD_SNAP", "off"),
            ("LIVE_TRACKER_BIND", "127.0.0.1:8080"),
            ("LIVE_TRACKER_GPS_DEVICE", "/dev/ttyACM0"),
        ]))
        .unwrap();

        assert_eq!(config.average_speed_kmh, 45.5);
        assert_eq!(config.demo.steps, 5);
        assert_eq!(config.gps.maximum_age, None);
        assert!(!config.routing.enabled);
        assert_eq!(config.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.gps_device, Some(PathBuf::from("/dev/ttyACM0")));
        assert_eq!(config.demo_generator().unwrap().total_steps(), 5);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            TrackerConfig::from_lookup(lookup(&[("LIVE_TRACKER_RIDE_TICK_SECS", "soon")])),
            Err(TrackerError::Config(_))
        ));
        assert!(TrackerConfig::from_lookup(lookup(&[("LIVE_TRACKER_DEMO_STEPS", "0")])).is_err());
        assert!(TrackerConfig::from_lookup(lookup(&[("LIVE_TRACKER_AVERAGE_SPEED_KMH", "-4")])).is_err());
        assert!(TrackerConfig::from_lookup(lookup(&[("LIVE_TRACKER_ROAD_SNAP", "maybe")])).is_err());
        assert!(TrackerConfig::from_lookup(lookup(&[("LIVE_TRACKER_DEMO_INTERVAL_MS", "0")])).is_err());
    }
}
