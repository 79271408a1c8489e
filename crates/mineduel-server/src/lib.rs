pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod journal;
pub mod registry;
pub mod state;
pub mod ws;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use mineduel_core::net::messages::{RoomClosedMsg, ServerMessage};
use mineduel_core::net::protocol::encode_server_message;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let web_root = config.web_root.clone();
    let state = AppState::new(config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/admin/ws", axum::routing::get(admin::admin_ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .route("/api/config", axum::routing::get(api::get_config))
        .route("/api/admin/login", axum::routing::post(api::admin_login))
        .fallback_service(ServeDir::new(&web_root))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state.clone());

    (app, state)
}

/// Background task that periodically evicts idle rooms: anything not in
/// play whose creation is older than the configured TTL. Removed rooms get
/// a `room_closed` notice and their journals archived.
pub fn spawn_idle_room_cleanup(state: AppState) {
    let check_interval = state.config.rooms.idle_check_interval_secs;
    let max_idle_ms = state.config.rooms.idle_timeout_ms as i64;
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(check_interval.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Idle room cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let removed = {
                        let mut rooms = state.rooms.write().await;
                        rooms.cleanup_idle_rooms(max_idle_ms)
                    };
                    if removed.is_empty() {
                        continue;
                    }

                    let closed = ServerMessage::RoomClosed(RoomClosedMsg {
                        reason: "idle_timeout".to_string(),
                        message: "The room was closed after being idle".to_string(),
                    });
                    let text = encode_server_message(&closed).ok();
                    for entry in &removed {
                        if let Some(ref text) = text {
                            entry.fan_out(text, text);
                        }
                        state.journals.archive(&entry.room.code);
                    }
                    tracing::info!(removed = removed.len(), "Cleaned up idle rooms");
                    admin::push_rooms_update(&state).await;
                }
            }
        }
    });
}

/// Archive journal files left behind by rooms that no longer exist, e.g.
/// after an unclean shutdown. Run once at startup.
pub async fn sweep_orphaned_journals(state: &AppState) {
    let active: std::collections::HashSet<String> = {
        let rooms = state.rooms.read().await;
        rooms.active_codes().into_iter().collect()
    };
    state.journals.orphan_sweep(&active).await;
}
