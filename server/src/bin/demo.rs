use std::sync::Arc;

use chrono::Utc;
use live_tracker_lib::{
    channel::{Channel, LocalHub},
    config::TrackerConfig,
    customer::CustomerTracker,
    osrm::OsrmRouter,
    position::Position,
    protocol::{ProviderInfo, TripId, TripSnapshot},
    provider::{ProviderStatus, ProviderTracker},
    relay::TripRelay,
    route::RoadRouter,
    source::NmeaSource,
};
use server::logging;
use tokio::io::BufReader;

const CUSTOMER_LAT: f64 = 11.838993;
const CUSTOMER_LNG: f64 = 75.568532;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init(env!("CARGO_CRATE_NAME"), "demo.log")?;

    let config = TrackerConfig::from_env()?;
    let hub = LocalHub::new(TripRelay::new(config.average_speed_kmh)?.with_ride_tick(config.ride_tick)?);
    let trip_id = TripId::new(format!("demo-{}", Utc::now().timestamp()));

    let router: Option<Arc<dyn RoadRouter>> = if config.routing.enabled {
        tracing::info!("Road snapping through {}", config.routing.base_url);
        Some(Arc::new(OsrmRouter::new(config.routing.base_url.clone(), config.routing.timeout)?))
    } else {
        None
    };

    let customer_channel = Arc::new(hub.channel());
    customer_channel.connect().await?;
    let customer = CustomerTracker::join(
        customer_channel,
        trip_id.clone(),
        Position::new(CUSTOMER_LAT, CUSTOMER_LNG)?,
        router,
        &config,
    )
    .await?;

    let provider_channel = Arc::new(hub.channel());
    provider_channel.connect().await?;
    let mut provider = ProviderTracker::new(
        provider_channel,
        trip_id.clone(),
        ProviderInfo {
            name: "John Doe".into(),
            vehicle: "Toyota Camry - ABC123".into(),
        },
    );
    let mut status = provider.status();

    // A finished demo run is the natural end; a device runs until interrupted
    let expected_fixes = match &config.gps_device {
        Some(path) => {
            tracing::info!("Reading NMEA positions from {}", path.display());
            let device = tokio::fs::File::open(path).await?;
            provider.start_watching(NmeaSource::new(BufReader::new(device)), config.gps).await?;
            None
        }
        None => {
            provider.start_demo(config.demo_generator()?, config.demo.interval).await?;
            Some(config.demo.steps as usize)
        }
    };

    let mut snapshots = customer.observe();
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                log_telemetry(&snapshot);

                if expected_fixes.is_some_and(|n| snapshot.traveled_route.len() >= n) {
                    tracing::info!("Demo run complete");
                    break;
                }
            }
            Ok(()) = status.changed() => {
                if let ProviderStatus::Faulted(message) = &*status.borrow_and_update() {
                    tracing::error!("Position source failed: {}", message);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    provider.stop().await?;
    let last = customer.ended().await;
    tracing::info!(
        "Trip {} closed after {} positions, {} ride minutes, last distance {:.2} km",
        last.trip_id,
        last.traveled_route.len(),
        last.ride_elapsed_minutes,
        last.distance_km
    );

    Ok(())
}

fn log_telemetry(snapshot: &TripSnapshot) {
    let Some(provider) = snapshot.provider_position else {
        tracing::info!("Trip {} {:?}, waiting for the provider", snapshot.trip_id, snapshot.status);
        return;
    };

    tracing::info!(
        "Provider at {:.5}, {:.5} | {:.2} km away, ETA {} min | ride {} min | {} traveled, {} road points",
        provider.lat(),
        provider.lng(),
        snapshot.distance_km,
        snapshot.eta_minutes,
        snapshot.ride_elapsed_minutes,
        snapshot.traveled_route.len(),
        snapshot.road_route.len()
    );
}
