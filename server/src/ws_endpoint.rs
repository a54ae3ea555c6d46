use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use live_tracker_lib::{
    channel::{Channel, ChannelNotice},
    protocol::TripEvent,
};

use crate::server_state::ServerState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    tracing::info!("New connection from {}", addr);

    ws.on_upgrade(move |socket| async move {
        let res = handle_connection(socket, state).await;
        tracing::info!("Connection from {} ended with result: {:?}", addr, res);
    })
}

/// Bridges one WebSocket to one hub peer until either side goes away.
pub async fn handle_connection(socket: WebSocket, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let channel = state.hub.channel();
    let mut subscription = channel.subscribe();
    subscription.on_all();
    channel.connect().await?;

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            notice = subscription.recv() => match notice {
                Some(ChannelNotice::Disconnected) | None => {
                    tracing::info!("Peer {} dropped by hub", channel.id());
                    break;
                }
                Some(notice) => {
                    if let Some(text) = encode_notice(notice)? {
                        sender.send(Message::Text(text.into())).await?;
                    }
                }
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_frame(text.as_str()) {
                        tracing::debug!("Peer {} sent {}", channel.id(), event.kind());
                        channel.emit(event).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::error!("WebSocket error on peer {}: {}", channel.id(), err);
                    return Err(err.into());
                }
            },
        }
    }

    Ok(())
}

/// Events go out as JSON text; link lifecycle stays on this side of the socket.
pub fn encode_notice(notice: ChannelNotice) -> Result<Option<String>, anyhow::Error> {
    match notice {
        ChannelNotice::Event(event) => Ok(Some(event.to_json()?)),
        _ => Ok(None),
    }
}

pub fn decode_frame(text: &str) -> Option<TripEvent> {
    match TripEvent::from_json(text) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!("Skipping malformed frame: {}", err);
            None
        }
    }
}
