use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mineduel_core::engine::{GameEngine, GameSettings, PlayerRole};
use mineduel_core::net::messages::{AdminRoomsUpdateMsg, DanmakuBroadcast, RoomStats};
use mineduel_core::room::{
    ConnId, PlayerSlot, Room, RoomState, generate_room_code, is_valid_room_code,
    normalize_room_code,
};
use mineduel_core::time;

/// Per-connection sender for outbound frames. Bounded so a slow client
/// cannot exhaust memory; `Bytes` makes fan-out clones cheap.
pub type ClientSender = mpsc::Sender<Bytes>;

/// Most recent chat messages retained per room for spectator catch-up.
const CHAT_HISTORY_LIMIT: usize = 100;

/// One registered room plus everything needed to reach its audiences.
pub struct RoomEntry {
    pub room: Room,
    /// Player connections (host and guest) keyed by connection id.
    connections: HashMap<ConnId, ClientSender>,
    spectators: HashMap<ConnId, ClientSender>,
    admin_spectators: HashMap<ConnId, ClientSender>,
    pub chat_history: Vec<DanmakuBroadcast>,
    /// Handle for the 1 Hz countdown task of the running game.
    pub timer_task: Option<JoinHandle<()>>,
}

impl RoomEntry {
    fn new(room: Room, host_conn: ConnId, sender: ClientSender) -> Self {
        let mut connections = HashMap::new();
        connections.insert(host_conn, sender);
        Self {
            room,
            connections,
            spectators: HashMap::new(),
            admin_spectators: HashMap::new(),
            chat_history: Vec::new(),
            timer_task: None,
        }
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    pub fn push_chat(&mut self, record: DanmakuBroadcast) {
        self.chat_history.push(record);
        if self.chat_history.len() > CHAT_HISTORY_LIMIT {
            self.chat_history.remove(0);
        }
    }

    /// Stop the countdown ticker, if one is running.
    pub fn stop_timer(&mut self) {
        if let Some(handle) = self.timer_task.take() {
            handle.abort();
        }
    }

    pub fn send_to_role(&self, role: PlayerRole, text: &str) {
        if let Some(slot) = self.room.slot(role)
            && let Some(sender) = self.connections.get(&slot.conn_id)
            && sender.try_send(Bytes::copy_from_slice(text.as_bytes())).is_err()
        {
            tracing::debug!(room = %self.room.code, ?role, "Dropping send to slow player");
        }
    }

    /// Deliver to both players.
    pub fn fan_out_players(&self, text: &str) {
        let bytes = Bytes::copy_from_slice(text.as_bytes());
        for (&conn_id, sender) in &self.connections {
            if sender.try_send(bytes.clone()).is_err() {
                tracing::debug!(
                    conn_id, room = %self.room.code,
                    "Skipping broadcast to slow player"
                );
            }
        }
    }

    /// Deliver to public and admin spectators.
    pub fn fan_out_watchers(&self, text: &str) {
        let bytes = Bytes::copy_from_slice(text.as_bytes());
        for (&conn_id, sender) in self.spectators.iter().chain(&self.admin_spectators) {
            if sender.try_send(bytes.clone()).is_err() {
                tracing::debug!(
                    conn_id, room = %self.room.code,
                    "Skipping broadcast to slow spectator"
                );
            }
        }
    }

    /// Fan a pair of encodings out to every audience: players get the masked
    /// variant, spectators and admins the god view. For events without grid
    /// data both arguments are the same string.
    pub fn fan_out(&self, player_text: &str, watcher_text: &str) {
        self.fan_out_players(player_text);
        self.fan_out_watchers(watcher_text);
    }

    fn stats(&self) -> RoomStats {
        let game = self.room.game.as_ref();
        RoomStats {
            code: self.room.code.clone(),
            state: self.room.state,
            host_name: self.room.host.name.clone(),
            guest_name: self.room.guest.as_ref().map(|g| g.name.clone()),
            settings: self.room.settings,
            created_at: self.room.created_at,
            game_started_at: self.room.game_started_at,
            play_duration: (self.room.state == RoomState::Playing)
                .then(|| {
                    self.room
                        .game_started_at
                        .map(|start| (time::now_millis() - start) / 1000)
                })
                .flatten(),
            spectator_count: self.spectators.len(),
            current_player: game.map(|g| g.current_player()),
            time_remaining: game.and_then(|g| g.time_remaining()),
            scores: game.map(|g| g.scores()),
        }
    }
}

/// Why a join was refused. In-progress and finished rooms can still be
/// watched, so those carry the canonical code for the spectate redirect.
#[derive(Debug)]
pub enum JoinRejection {
    NotFound,
    Full,
    InProgress { code: String },
    Finished { code: String },
}

/// Outcome of a player connection leaving its room.
pub enum LeaveOutcome {
    /// The host left: the room is removed wholesale and returned so the
    /// caller can notify its remaining audiences and archive the journal.
    HostLeft { entry: Box<RoomEntry> },
    /// The guest left; the room stays. Mid-game the state has already been
    /// flipped to `finished`.
    GuestLeft {
        code: String,
        guest_name: String,
        was_playing: bool,
    },
}

/// In-memory table of all rooms, keyed by canonical room code. Lives behind
/// the state's `RwLock`; every method assumes the caller holds it.
pub struct RoomRegistry {
    rooms: HashMap<String, RoomEntry>,
    /// Player connection → room code.
    by_conn: HashMap<ConnId, String>,
    /// Public spectator connection → room code.
    spectator_rooms: HashMap<ConnId, String>,
    /// Admin spectator connection → room code.
    admin_spectator_rooms: HashMap<ConnId, String>,
    code_length: usize,
}

impl RoomRegistry {
    pub fn new(code_length: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            by_conn: HashMap::new(),
            spectator_rooms: HashMap::new(),
            admin_spectator_rooms: HashMap::new(),
            code_length,
        }
    }

    pub fn code_length(&self) -> usize {
        self.code_length
    }

    /// Create a room with a fresh collision-free code and install the host.
    /// Returns the room code.
    pub fn create_room(
        &mut self,
        conn_id: ConnId,
        name: String,
        settings: GameSettings,
        sender: ClientSender,
    ) -> String {
        let code = loop {
            let candidate = generate_room_code(self.code_length);
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let host = PlayerSlot { conn_id, name };
        let room = Room::new(code.clone(), host, settings);
        self.by_conn.insert(conn_id, code.clone());
        self.rooms
            .insert(code.clone(), RoomEntry::new(room, conn_id, sender));
        code
    }

    /// Seat a guest. Succeeds only while the room is waiting with an empty
    /// guest slot; rooms already in play or finished are watchable instead.
    pub fn join_room(
        &mut self,
        code_raw: &str,
        conn_id: ConnId,
        name: String,
        sender: ClientSender,
    ) -> Result<String, JoinRejection> {
        let code = normalize_room_code(code_raw);
        if !is_valid_room_code(&code, self.code_length) {
            return Err(JoinRejection::NotFound);
        }
        let Some(entry) = self.rooms.get_mut(&code) else {
            return Err(JoinRejection::NotFound);
        };

        match entry.room.state {
            RoomState::Playing => return Err(JoinRejection::InProgress { code }),
            RoomState::Finished => return Err(JoinRejection::Finished { code }),
            RoomState::Waiting => {},
        }
        if entry.room.guest.is_some() {
            return Err(JoinRejection::Full);
        }

        entry.room.guest = Some(PlayerSlot { conn_id, name });
        entry.connections.insert(conn_id, sender);
        self.by_conn.insert(conn_id, code.clone());
        Ok(code)
    }

    /// Remove a player connection from its room.
    pub fn leave_room(&mut self, conn_id: ConnId) -> Option<LeaveOutcome> {
        let code = self.by_conn.remove(&conn_id)?;
        let entry = self.rooms.get_mut(&code)?;

        match entry.room.role_of(conn_id) {
            Some(PlayerRole::Host) => {
                let mut entry = self.rooms.remove(&code)?;
                entry.stop_timer();
                // Drop every index entry pointing at the removed room.
                if let Some(guest) = &entry.room.guest {
                    self.by_conn.remove(&guest.conn_id);
                }
                self.spectator_rooms.retain(|_, c| *c != code);
                self.admin_spectator_rooms.retain(|_, c| *c != code);
                Some(LeaveOutcome::HostLeft {
                    entry: Box::new(entry),
                })
            },
            Some(PlayerRole::Guest) => {
                let guest = entry.room.guest.take();
                entry.connections.remove(&conn_id);
                let was_playing = entry.room.state == RoomState::Playing;
                entry.room.state = if was_playing {
                    RoomState::Finished
                } else {
                    RoomState::Waiting
                };
                Some(LeaveOutcome::GuestLeft {
                    code,
                    guest_name: guest.map(|g| g.name).unwrap_or_default(),
                    was_playing,
                })
            },
            None => None,
        }
    }

    pub fn get_entry(&self, code_raw: &str) -> Option<&RoomEntry> {
        self.rooms.get(&normalize_room_code(code_raw))
    }

    pub fn get_entry_mut(&mut self, code_raw: &str) -> Option<&mut RoomEntry> {
        self.rooms.get_mut(&normalize_room_code(code_raw))
    }

    /// The room and role of a player connection, if it is seated anywhere.
    pub fn player_room(&self, conn_id: ConnId) -> Option<(&RoomEntry, PlayerRole)> {
        let code = self.by_conn.get(&conn_id)?;
        let entry = self.rooms.get(code)?;
        let role = entry.room.role_of(conn_id)?;
        Some((entry, role))
    }

    pub fn player_room_mut(&mut self, conn_id: ConnId) -> Option<(&mut RoomEntry, PlayerRole)> {
        let code = self.by_conn.get(&conn_id)?.clone();
        let entry = self.rooms.get_mut(&code)?;
        let role = entry.room.role_of(conn_id)?;
        Some((entry, role))
    }

    pub fn is_player(&self, conn_id: ConnId) -> bool {
        self.by_conn.contains_key(&conn_id)
    }

    pub fn is_spectator(&self, conn_id: ConnId) -> bool {
        self.spectator_rooms.contains_key(&conn_id)
    }

    /// Add a public spectator. Returns the canonical code and the new count.
    pub fn add_spectator(
        &mut self,
        code_raw: &str,
        conn_id: ConnId,
        sender: ClientSender,
    ) -> Option<(String, usize)> {
        let code = normalize_room_code(code_raw);
        let entry = self.rooms.get_mut(&code)?;
        entry.spectators.insert(conn_id, sender);
        self.spectator_rooms.insert(conn_id, code.clone());
        let count = entry.spectators.len();
        Some((code, count))
    }

    /// Remove a public spectator by connection. Returns the affected room
    /// code and the remaining count.
    pub fn remove_spectator(&mut self, conn_id: ConnId) -> Option<(String, usize)> {
        let code = self.spectator_rooms.remove(&conn_id)?;
        let entry = self.rooms.get_mut(&code)?;
        entry.spectators.remove(&conn_id);
        let count = entry.spectators.len();
        Some((code, count))
    }

    pub fn add_admin_spectator(
        &mut self,
        code_raw: &str,
        conn_id: ConnId,
        sender: ClientSender,
    ) -> Option<String> {
        let code = normalize_room_code(code_raw);
        let entry = self.rooms.get_mut(&code)?;
        entry.admin_spectators.insert(conn_id, sender);
        self.admin_spectator_rooms.insert(conn_id, code.clone());
        Some(code)
    }

    pub fn remove_admin_spectator(&mut self, conn_id: ConnId) -> Option<String> {
        let code = self.admin_spectator_rooms.remove(&conn_id)?;
        if let Some(entry) = self.rooms.get_mut(&code) {
            entry.admin_spectators.remove(&conn_id);
        }
        Some(code)
    }

    /// Project every room into the admin dashboard payload.
    pub fn stats(&self) -> AdminRoomsUpdateMsg {
        let rooms: Vec<RoomStats> = self.rooms.values().map(|e| e.stats()).collect();
        let count_state =
            |state: RoomState| rooms.iter().filter(|r| r.state == state).count();
        AdminRoomsUpdateMsg {
            total_rooms: rooms.len(),
            playing_count: count_state(RoomState::Playing),
            waiting_count: count_state(RoomState::Waiting),
            finished_count: count_state(RoomState::Finished),
            rooms,
        }
    }

    /// Install a fresh engine and mark the room as playing.
    pub fn start_game(entry: &mut RoomEntry) {
        let starting = entry.room.next_starting_player;
        entry.room.game = Some(GameEngine::new(entry.room.settings, starting));
        entry.room.state = RoomState::Playing;
        entry.room.game_started_at = Some(time::now_millis());
    }

    /// Remove rooms that are not in play and older than `max_idle_ms`.
    /// Returns the removed entries so callers can notify and archive.
    pub fn cleanup_idle_rooms(&mut self, max_idle_ms: i64) -> Vec<RoomEntry> {
        let now = time::now_millis();
        let expired: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, e)| {
                e.room.state != RoomState::Playing && now - e.room.created_at > max_idle_ms
            })
            .map(|(code, _)| code.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for code in expired {
            if let Some(mut entry) = self.rooms.remove(&code) {
                entry.stop_timer();
                self.by_conn.retain(|_, c| *c != code);
                self.spectator_rooms.retain(|_, c| *c != code);
                self.admin_spectator_rooms.retain(|_, c| *c != code);
                removed.push(entry);
            }
        }
        removed
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn playing_count(&self) -> usize {
        self.rooms
            .values()
            .filter(|e| e.room.state == RoomState::Playing)
            .count()
    }

    pub fn active_codes(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sender() -> (ClientSender, mpsc::Receiver<Bytes>) {
        mpsc::channel(64)
    }

    fn settings() -> GameSettings {
        GameSettings::default()
    }

    #[test]
    fn create_room_returns_valid_code() {
        let mut reg = RoomRegistry::new(6);
        let (tx, _rx) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx);
        assert!(is_valid_room_code(&code, 6));
        assert!(reg.get_entry(&code).is_some());
        assert!(reg.is_player(1));
    }

    #[test]
    fn join_room_seats_guest() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);

        let (tx2, _rx2) = make_sender();
        let joined = reg.join_room(&code, 2, "Bob".into(), tx2).unwrap();
        assert_eq!(joined, code);

        let entry = reg.get_entry(&code).unwrap();
        assert_eq!(entry.room.guest.as_ref().unwrap().name, "Bob");
        assert_eq!(entry.room.role_of(2), Some(PlayerRole::Guest));
    }

    #[test]
    fn join_normalizes_code_case() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);

        let (tx2, _rx2) = make_sender();
        let lowered = format!("  {} ", code.to_ascii_lowercase());
        assert!(reg.join_room(&lowered, 2, "Bob".into(), tx2).is_ok());
    }

    #[test]
    fn join_missing_room_fails() {
        let mut reg = RoomRegistry::new(6);
        let (tx, _rx) = make_sender();
        assert!(matches!(
            reg.join_room("ZZZZZZ", 1, "Bob".into(), tx),
            Err(JoinRejection::NotFound)
        ));
    }

    #[test]
    fn join_full_room_fails() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);
        let (tx2, _rx2) = make_sender();
        reg.join_room(&code, 2, "Bob".into(), tx2).unwrap();

        // Guest slot now filled while still waiting (no game yet)
        let (tx3, _rx3) = make_sender();
        assert!(matches!(
            reg.join_room(&code, 3, "Carol".into(), tx3),
            Err(JoinRejection::Full)
        ));
    }

    #[test]
    fn join_playing_room_redirects() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);
        let (tx2, _rx2) = make_sender();
        reg.join_room(&code, 2, "Bob".into(), tx2).unwrap();
        RoomRegistry::start_game(reg.get_entry_mut(&code).unwrap());

        let (tx3, _rx3) = make_sender();
        assert!(matches!(
            reg.join_room(&code, 3, "Carol".into(), tx3),
            Err(JoinRejection::InProgress { .. })
        ));
    }

    #[test]
    fn host_leave_removes_room() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);
        let (tx2, _rx2) = make_sender();
        reg.join_room(&code, 2, "Bob".into(), tx2).unwrap();

        let outcome = reg.leave_room(1).unwrap();
        assert!(matches!(outcome, LeaveOutcome::HostLeft { .. }));
        assert!(reg.get_entry(&code).is_none());
        assert!(!reg.is_player(2), "guest index must be cleared too");
    }

    #[test]
    fn guest_leave_mid_game_finishes_room() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);
        let (tx2, _rx2) = make_sender();
        reg.join_room(&code, 2, "Bob".into(), tx2).unwrap();
        RoomRegistry::start_game(reg.get_entry_mut(&code).unwrap());

        let outcome = reg.leave_room(2).unwrap();
        match outcome {
            LeaveOutcome::GuestLeft {
                was_playing,
                guest_name,
                ..
            } => {
                assert!(was_playing);
                assert_eq!(guest_name, "Bob");
            },
            LeaveOutcome::HostLeft { .. } => panic!("guest leave must keep the room"),
        }
        let entry = reg.get_entry(&code).unwrap();
        assert_eq!(entry.room.state, RoomState::Finished);
        assert!(entry.room.guest.is_none());
    }

    #[test]
    fn guest_leave_while_waiting_reverts_to_waiting() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);
        let (tx2, _rx2) = make_sender();
        reg.join_room(&code, 2, "Bob".into(), tx2).unwrap();

        reg.leave_room(2).unwrap();
        let entry = reg.get_entry(&code).unwrap();
        assert_eq!(entry.room.state, RoomState::Waiting);

        // Slot is free again
        let (tx3, _rx3) = make_sender();
        assert!(reg.join_room(&code, 3, "Carol".into(), tx3).is_ok());
    }

    #[test]
    fn spectators_tracked_per_room() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);

        let (tx2, _rx2) = make_sender();
        let (tx3, _rx3) = make_sender();
        let (_, count) = reg.add_spectator(&code, 10, tx2).unwrap();
        assert_eq!(count, 1);
        let (_, count) = reg.add_spectator(&code, 11, tx3).unwrap();
        assert_eq!(count, 2);
        assert!(reg.is_spectator(10));

        let (left_code, count) = reg.remove_spectator(10).unwrap();
        assert_eq!(left_code, code);
        assert_eq!(count, 1);
        assert!(!reg.is_spectator(10));
    }

    #[test]
    fn idle_cleanup_skips_playing_rooms() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let idle_code = reg.create_room(1, "Alice".into(), settings(), tx1);
        let (tx2, _rx2) = make_sender();
        let live_code = reg.create_room(2, "Bob".into(), settings(), tx2);
        let (tx3, _rx3) = make_sender();
        reg.join_room(&live_code, 3, "Carol".into(), tx3).unwrap();
        RoomRegistry::start_game(reg.get_entry_mut(&live_code).unwrap());

        // Age both rooms past the TTL
        reg.get_entry_mut(&idle_code).unwrap().room.created_at -= 7_200_000;
        reg.get_entry_mut(&live_code).unwrap().room.created_at -= 7_200_000;

        let removed = reg.cleanup_idle_rooms(3_600_000);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].room.code, idle_code);
        assert!(reg.get_entry(&live_code).is_some());
        assert!(!reg.is_player(1));
    }

    #[test]
    fn stats_projection_counts_by_state() {
        let mut reg = RoomRegistry::new(6);
        let (tx1, _rx1) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx1);
        let (tx2, _rx2) = make_sender();
        reg.create_room(2, "Bob".into(), settings(), tx2);

        let (tx3, _rx3) = make_sender();
        reg.join_room(&code, 3, "Carol".into(), tx3).unwrap();
        RoomRegistry::start_game(reg.get_entry_mut(&code).unwrap());

        let stats = reg.stats();
        assert_eq!(stats.total_rooms, 2);
        assert_eq!(stats.playing_count, 1);
        assert_eq!(stats.waiting_count, 1);
        assert_eq!(stats.finished_count, 0);

        let playing = stats
            .rooms
            .iter()
            .find(|r| r.state == RoomState::Playing)
            .unwrap();
        assert_eq!(playing.host_name, "Alice");
        assert_eq!(playing.guest_name.as_deref(), Some("Carol"));
        assert!(playing.current_player.is_some());
    }

    #[test]
    fn chat_history_is_bounded() {
        let mut reg = RoomRegistry::new(6);
        let (tx, _rx) = make_sender();
        let code = reg.create_room(1, "Alice".into(), settings(), tx);
        let entry = reg.get_entry_mut(&code).unwrap();
        for i in 0..150 {
            entry.push_chat(DanmakuBroadcast::new("n".into(), format!("m{i}"), false));
        }
        assert_eq!(entry.chat_history.len(), CHAT_HISTORY_LIMIT);
        assert_eq!(entry.chat_history[0].message, "m50");
    }
}
