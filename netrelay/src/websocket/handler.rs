use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::{api::RelayState, websocket::ConnectionId};

/// Why a peer's receive loop ended
#[derive(thiserror::Error, Debug)]
pub enum DisconnectReason {
    #[error("peer closed the connection ({})", close_code(.0))]
    GracefulClose(Option<CloseFrame>),
    #[error("stream ended")]
    StreamEnded,
    #[error("receive failed: {0}")]
    ReceiveFailure(axum::Error),
    #[error("{0}")]
    DeliveryFailure(crate::error::Error),
    #[error("evicted after a failed delivery")]
    Evicted,
    #[error("relay shutting down")]
    Shutdown,
}

fn close_code(frame: &Option<CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("code {}, reason {:?}", frame.code, frame.reason.as_str()),
        None => "no close frame".to_string(),
    }
}

/// WebSocket upgrade handler for relay peers
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    tracing::debug!(peer = %addr, "WebSocket upgrade requested");
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(peer = %addr, error = %e, "WebSocket handshake failed");
    })
    .on_upgrade(move |socket| handle_peer_socket(socket, addr, state))
}

/// Drive one peer connection until it closes
async fn handle_peer_socket(socket: WebSocket, addr: SocketAddr, state: RelayState) {
    let (sink, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = &state.registry;
    let connection_id = registry.register(tx).await;
    let writer = tokio::spawn(write_to_peer(sink, rx, connection_id));
    tracing::info!(connection_id = %connection_id, peer = %addr, "WebSocket connection established");

    let reason = loop {
        let msg = tokio::select! {
            biased;
            _ = state.cancel_token.cancelled() => break DisconnectReason::Shutdown,
            msg = receiver.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    message_length = text.as_str().len(),
                    "Received text message"
                );
                if !registry.is_open(connection_id).await {
                    break DisconnectReason::Evicted;
                }
                registry.broadcast(text, connection_id).await;
            }
            Some(Ok(Message::Close(frame))) => break DisconnectReason::GracefulClose(frame),
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = reply_pong(connection_id, data, &state).await {
                    break DisconnectReason::DeliveryFailure(e);
                }
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Binary(data))) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    message_length = data.len(),
                    "Ignoring unexpected binary message"
                );
            }
            Some(Err(e)) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break DisconnectReason::ReceiveFailure(e);
            }
            None => break DisconnectReason::StreamEnded,
        }
    };

    registry.unregister(connection_id).await;
    writer.abort();
    tracing::info!(
        connection_id = %connection_id,
        peer = %addr,
        reason = %reason,
        "Peer disconnected"
    );
}

/// Drain a peer's outbound queue into its socket.
///
/// Returning drops the queue's receiver, so the next enqueue for this peer fails
/// and the registry evicts it.
async fn write_to_peer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: UnboundedReceiver<Message>,
    connection_id: ConnectionId,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Failed to write to peer");
            return;
        }
    }
    // The registry dropped the queue, so the connection is closing.
    let _ = sink.close().await;
}

async fn reply_pong(
    connection_id: ConnectionId,
    data: axum::body::Bytes,
    state: &RelayState,
) -> crate::error::Result<()> {
    state
        .registry
        .send_to(connection_id, Message::Pong(data))
        .await
}
