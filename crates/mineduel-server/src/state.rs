use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use mineduel_core::room::ConnId;

use crate::admin::AdminHub;
use crate::config::ServerConfig;
use crate::journal::JournalHandle;
use crate::registry::RoomRegistry;

pub type SharedRegistry = Arc<RwLock<RoomRegistry>>;

#[derive(Clone)]
pub struct AppState {
    pub rooms: SharedRegistry,
    pub admin: Arc<RwLock<AdminHub>>,
    pub journals: JournalHandle,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    next_conn_id: Arc<AtomicU64>,
    /// Last accepted chat per connection, for the send cooldown.
    pub chat_cooldowns: Arc<std::sync::Mutex<HashMap<ConnId, Instant>>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let journals = JournalHandle::new(std::path::Path::new(&config.data_dir));
        Self {
            rooms: Arc::new(RwLock::new(RoomRegistry::new(config.rooms.code_length))),
            admin: Arc::new(RwLock::new(AdminHub::new())),
            journals,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            chat_cooldowns: Arc::new(std::sync::Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn alloc_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// RAII guard that decrements a counter on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
