use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use mineduel_core::net::messages::{
    AdminClientMessage, ErrorMsg, ServerMessage, SpectateJoinedMsg,
};
use mineduel_core::net::protocol::decode_admin_message;
use mineduel_core::room::ConnId;
use mineduel_core::time;

use crate::auth;
use crate::dispatch::send_message;
use crate::state::{AppState, ConnectionGuard};
use crate::ws::spawn_writer;

/// Admin connections subscribed to room stats. Admin-spectator membership
/// lives in the registry next to the public spectator sets.
#[derive(Default)]
pub struct AdminHub {
    subscribers: HashMap<ConnId, mpsc::Sender<Bytes>>,
}

impl AdminHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, conn_id: ConnId, sender: mpsc::Sender<Bytes>) {
        self.subscribers.insert(conn_id, sender);
    }

    pub fn unsubscribe(&mut self, conn_id: ConnId) {
        self.subscribers.remove(&conn_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn broadcast(&self, text: &str) {
        let bytes = Bytes::copy_from_slice(text.as_bytes());
        for (&conn_id, sender) in &self.subscribers {
            if sender.try_send(bytes.clone()).is_err() {
                tracing::debug!(conn_id, "Skipping stats push to slow admin");
            }
        }
    }
}

/// Push the current room stats to every subscribed admin. Called after each
/// rooms-changed transition and on fresh subscriptions.
pub async fn push_rooms_update(state: &AppState) {
    let stats = {
        let rooms = state.rooms.read().await;
        rooms.stats()
    };
    let msg = ServerMessage::AdminRoomsUpdate(stats);
    let Ok(text) = mineduel_core::net::protocol::encode_server_message(&msg) else {
        tracing::error!("Failed to encode admin rooms update");
        return;
    };
    let admin = state.admin.read().await;
    admin.broadcast(&text);
}

/// Admin namespace handshake. The bearer credential rides in the `token`
/// query parameter or an `Authorization: Bearer` header; invalid credentials
/// get the socket closed with reason "auth failed".
pub async fn admin_ws_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = params
        .get("token")
        .cloned()
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .unwrap_or_default();

    let authorized = state.config.admin.password.is_some()
        && auth::verify_token(
            &state.config.admin.token_secret,
            &token,
            time::now_millis(),
        );

    ws.on_upgrade(move |socket| handle_admin_socket(socket, state, authorized))
}

async fn handle_admin_socket(socket: WebSocket, state: AppState, authorized: bool) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    if !authorized {
        tracing::warn!("Admin connection rejected at handshake");
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "auth failed".into(),
            })))
            .await;
        return;
    }

    let _guard = ConnectionGuard::new(state.ws_connection_count.clone());
    let conn_id = state.alloc_conn_id();
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.client_message_buffer);
    spawn_writer(ws_sender, rx);
    tracing::info!(conn_id, "Admin connected");

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let msg = match decode_admin_message(text.as_str()) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "Bad admin frame");
                send_message(&tx, &ServerMessage::AdminError(ErrorMsg::new("Invalid message")));
                continue;
            },
        };

        match msg {
            AdminClientMessage::SubscribeRooms => {
                {
                    let mut admin = state.admin.write().await;
                    admin.subscribe(conn_id, tx.clone());
                }
                // Immediate stats snapshot on subscription
                let stats = {
                    let rooms = state.rooms.read().await;
                    rooms.stats()
                };
                send_message(&tx, &ServerMessage::AdminRoomsUpdate(stats));
            },
            AdminClientMessage::AdminSpectate(m) => {
                let mut rooms = state.rooms.write().await;
                rooms.remove_admin_spectator(conn_id);
                match rooms.add_admin_spectator(&m.room_code, conn_id, tx.clone()) {
                    Some(code) => {
                        if let Some(entry) = rooms.get_entry(&code) {
                            send_message(
                                &tx,
                                &ServerMessage::SpectateJoined(SpectateJoinedMsg {
                                    room_code: code.clone(),
                                    host_name: entry.room.host.name.clone(),
                                    guest_name: entry
                                        .room
                                        .guest
                                        .as_ref()
                                        .map(|g| g.name.clone()),
                                    spectator_count: entry.spectator_count(),
                                    game_state: entry.room.state,
                                    game: entry
                                        .room
                                        .game
                                        .as_ref()
                                        .map(|g| g.spectator_snapshot()),
                                    match_stats: entry.room.match_stats,
                                    message_history: entry.chat_history.clone(),
                                }),
                            );
                        }
                    },
                    None => {
                        send_message(
                            &tx,
                            &ServerMessage::SpectateError(ErrorMsg::new("Room not found")),
                        );
                    },
                }
            },
            AdminClientMessage::LeaveSpectate => {
                let mut rooms = state.rooms.write().await;
                rooms.remove_admin_spectator(conn_id);
            },
        }
    }

    // Admin disconnected
    {
        let mut admin = state.admin.write().await;
        admin.unsubscribe(conn_id);
    }
    {
        let mut rooms = state.rooms.write().await;
        rooms.remove_admin_spectator(conn_id);
    }
    tracing::info!(conn_id, "Admin disconnected");
}
