use tracing_subscriber::EnvFilter;

use mineduel_server::config::ServerConfig;
use mineduel_server::{build_app, spawn_idle_room_cleanup, sweep_orphaned_journals};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let (app, state) = build_app(config);

    // Journals whose rooms died with a previous process get archived
    sweep_orphaned_journals(&state).await;

    spawn_idle_room_cleanup(state.clone());

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {listen_addr}: {e}");
            std::process::exit(1);
        },
    };

    tracing::info!("MineDuel server listening on {listen_addr}");

    axum::serve(listener, app).await.expect("Server error");
}
