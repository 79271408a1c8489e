use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mineduel_core::engine::SettingsPatch;
use mineduel_core::net::messages::{
    ClientMessage, CreateRoomMsg, JoinRoomMsg, RoomJoinedMsg, SendDanmakuMsg, ServerMessage,
    SpectateMsg,
};
use mineduel_core::net::protocol::decode_server_message;

use mineduel_server::build_app;
use mineduel_server::config::{AdminConfig, ServerConfig};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _server: tokio::task::JoinHandle<()>,
}

fn test_config() -> ServerConfig {
    let data_dir: PathBuf = std::env::temp_dir().join(format!(
        "mineduel-test-{}-{}",
        std::process::id(),
        mineduel_core::time::now_millis(),
    ));
    ServerConfig {
        data_dir: data_dir.to_string_lossy().into_owned(),
        admin: AdminConfig {
            username: "admin".into(),
            password: Some("test-pass".into()),
            token_secret: "test-secret".into(),
        },
        ..ServerConfig::default()
    }
}

impl TestServer {
    pub async fn new() -> Self {
        Self::from_config(test_config()).await
    }

    /// Start a server with the default test config tweaked by `mutate`.
    pub async fn with_config(mutate: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = test_config();
        mutate(&mut config);
        Self::from_config(config).await
    }

    async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _server: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn admin_ws_url(&self, token: &str) -> String {
        format!("ws://{}/admin/ws?token={token}", self.addr)
    }
}

pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send(stream: &mut WsStream, msg: &ClientMessage) {
    let text = serde_json::to_string(msg).unwrap();
    stream.send(Message::Text(text.into())).await.unwrap();
}

/// Read the next server message (5 s timeout), skipping non-text frames.
pub async fn ws_recv(stream: &mut WsStream) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return decode_server_message(text.as_str()).unwrap();
                },
                Some(Ok(Message::Close(frame))) => panic!("WebSocket closed: {frame:?}"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
            }
        }
    })
    .await
    .expect("Timed out waiting for server message")
}

/// Read messages until `pred` matches, discarding the rest (timer updates,
/// spectator counts, and similar interleavings).
pub async fn ws_recv_until(
    stream: &mut WsStream,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let msg = ws_recv(stream).await;
            if pred(&msg) {
                return msg;
            }
        }
    })
    .await
    .expect("Timed out waiting for expected message")
}

/// Try to read one message within `timeout_ms`; None on timeout.
pub async fn ws_try_recv(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return decode_server_message(text.as_str()).unwrap();
                },
                Some(Ok(_)) => continue,
                _ => panic!("WebSocket closed while polling"),
            }
        }
    })
    .await
    .ok()
}

/// Create a room and return its code.
pub async fn create_room(stream: &mut WsStream, name: &str) -> String {
    create_room_with(stream, name, None).await
}

pub async fn create_room_with(
    stream: &mut WsStream,
    name: &str,
    settings: Option<SettingsPatch>,
) -> String {
    ws_send(
        stream,
        &ClientMessage::CreateRoom(CreateRoomMsg {
            player_name: name.to_string(),
            settings,
        }),
    )
    .await;
    match ws_recv(stream).await {
        ServerMessage::RoomCreated(created) => created.room_code,
        other => panic!("Expected room_created, got: {other:?}"),
    }
}

/// Join a room as guest; returns the `room_joined` payload.
pub async fn join_room(stream: &mut WsStream, code: &str, name: &str) -> RoomJoinedMsg {
    ws_send(
        stream,
        &ClientMessage::JoinRoom(JoinRoomMsg {
            room_code: code.to_string(),
            player_name: name.to_string(),
        }),
    )
    .await;
    match ws_recv(stream).await {
        ServerMessage::RoomJoined(joined) => joined,
        other => panic!("Expected room_joined, got: {other:?}"),
    }
}

pub async fn spectate(stream: &mut WsStream, code: &str) {
    ws_send(
        stream,
        &ClientMessage::PublicSpectate(SpectateMsg {
            room_code: code.to_string(),
        }),
    )
    .await;
}

pub async fn send_chat(stream: &mut WsStream, code: &str, nickname: &str, message: &str) {
    ws_send(
        stream,
        &ClientMessage::SendDanmaku(SendDanmakuMsg {
            room_code: code.to_string(),
            message: message.to_string(),
            nickname: nickname.to_string(),
            is_player: false,
        }),
    )
    .await;
}

/// Log in as the test admin and return the bearer token.
pub async fn admin_login(base_url: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base_url}/api/admin/login"))
        .json(&serde_json::json!({
            "username": "admin",
            "password": "test-pass",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}
