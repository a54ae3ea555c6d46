use crate::{error::TrackerError, position::Position};

/// Mean earth radius in km.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average speed assumed for arrival estimates, urban driving.
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 30.0;

/// Great-circle distance in kilometers.
pub fn distance_km(a: &Position, b: &Position) -> f64 {
    let d_lat = (b.lat() - a.lat()).to_radians();
    let d_lon = (b.lng() - a.lng()).to_radians();
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();

    let h = (f64::sin(d_lat / 2.).powi(2)
        + f64::cos(lat1) * f64::cos(lat2) * f64::sin(d_lon / 2.).powi(2))
    .clamp(0.0, 1.0);
    let c = 2. * f64::asin(f64::sqrt(h));

    EARTH_RADIUS_KM * c
}

/// Minutes to cover `distance_km` at the default average speed.
pub fn eta_minutes(distance_km: f64) -> u32 {
    eta_minutes_at(distance_km, DEFAULT_AVERAGE_SPEED_KMH)
}

pub fn eta_minutes_at(distance_km: f64, speed_kmh: f64) -> u32 {
    if !distance_km.is_finite() || distance_km <= 0.0 || speed_kmh <= 0.0 {
        return 0;
    }

    (distance_km / speed_kmh * 60.0).round().min(u32::MAX as f64) as u32
}

pub fn validate_speed(speed_kmh: f64) -> Result<f64, TrackerError> {
    if speed_kmh.is_finite() && speed_kmh > 0.0 {
        Ok(speed_kmh)
    } else {
        Err(TrackerError::InvalidSpeed(speed_kmh))
    }
}
