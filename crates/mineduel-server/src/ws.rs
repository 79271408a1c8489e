use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use mineduel_core::net::messages::{ErrorMsg, ServerMessage};
use mineduel_core::net::protocol::decode_client_message;
use mineduel_core::room::ConnId;

use crate::dispatch;
use crate::state::{AppState, ConnectionGuard};

/// Player namespace endpoint.
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(state.ws_connection_count.clone());
    let conn_id = state.alloc_conn_id();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.client_message_buffer);
    spawn_writer(ws_sender, rx);

    tracing::debug!(conn_id, "Player connected");
    read_loop(&mut ws_receiver, &state, conn_id, &tx).await;

    // Connection gone: forfeit running games, free spectator slots.
    dispatch::handle_disconnect(&state, conn_id).await;
    tracing::info!(conn_id, "Player disconnected");
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    conn_id: ConnId,
    tx: &mpsc::Sender<Bytes>,
) {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            _ => continue,
        };

        match decode_client_message(text.as_str()) {
            Ok(client_msg) => {
                dispatch::handle_client_message(state, conn_id, tx, client_msg).await;
            },
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "Undecodable client frame");
                dispatch::send_message(
                    tx,
                    &ServerMessage::Error(ErrorMsg::new("Invalid message")),
                );
            },
        }
    }
}

/// Drain a connection's outbound queue into its socket. Encoded frames are
/// JSON text; the task ends when every sender clone is gone or the socket
/// errors.
pub(crate) fn spawn_writer(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Bytes>) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let text = match String::from_utf8(data.to_vec()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });
}
