use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use live_tracker_lib::{channel::LocalHub, config::TrackerConfig, protocol::TripId, relay::TripRelay};
use local_ip_address::local_ip;
use server::{logging, server_state::ServerState, ws_endpoint};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init(env!("CARGO_CRATE_NAME"), "server.log")?;

    tracing::info!("Starting server...");

    let config = TrackerConfig::from_env()?;
    let relay = TripRelay::new(config.average_speed_kmh)?.with_ride_tick(config.ride_tick)?;

    let server_state = Arc::new(ServerState {
        hub: LocalHub::new(relay),
        config,
    });

    let app = app(server_state.clone());

    let listener = tokio::net::TcpListener::bind(server_state.config.bind).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    if let Ok(ip) = local_ip() {
        tracing::debug!("Reachable on the local network at {}:{}", ip, server_state.config.bind.port());
    }

    let hub = server_state.hub.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            tracing::info!("Shutting down, closing all peers");
            hub.set_accepting(false);
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn app(server_state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_endpoint::ws_handler))
        .route("/trip/{trip_id}", get(get_trip))
        .with_state(server_state)
        .layer(TraceLayer::new_for_http())
}

async fn get_trip(State(state): State<Arc<ServerState>>, Path(trip_id): Path<String>) -> Response {
    match state.hub.snapshot(&TripId::new(trip_id.clone())) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => {
            tracing::debug!("No trip with id {}", trip_id);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
