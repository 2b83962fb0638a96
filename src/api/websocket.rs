//! WebSocket handler for real-time measurement streaming
//!
//! Each connection becomes a distributor subscriber. This handler owns the
//! writer side: it pumps frames from the subscriber's outbound queue into the
//! socket until the distributor drops the queue or the client goes away.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, future, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::actors::{ConnectionEvent, SubscriberConnection};
use crate::api::state::ApiState;

/// Frames buffered per client before fan-out starts dropping them
pub const SUBSCRIBER_BUFFER: usize = 64;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    info!("WebSocket client connected");

    let (mut sink, stream) = socket.split();
    let (outbound, mut frames) = mpsc::channel::<String>(SUBSCRIBER_BUFFER);

    let inbound = stream.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(ConnectionEvent::Message(text)),
            Ok(Message::Close(_)) => Some(ConnectionEvent::Closed),
            // pings are answered by axum
            Ok(_) => None,
            Err(e) => Some(ConnectionEvent::Error(e.to_string())),
        })
    });

    if let Err(e) = state
        .distributor
        .subscribe(SubscriberConnection::new(outbound, inbound))
        .await
    {
        warn!("could not subscribe WebSocket client: {e:#}");
        let _ = sink.close().await;
        return;
    }

    while let Some(frame) = frames.recv().await {
        if sink.send(Message::Text(frame)).await.is_err() {
            debug!("WebSocket send failed, client disconnected");
            break;
        }
    }

    let _ = sink.close().await;
    info!("WebSocket client disconnected");
}
