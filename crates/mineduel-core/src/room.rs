use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::engine::{GameEngine, GameSettings, PlayerRole};
use crate::time;

/// Unique identifier for a connection, allocated by the server.
pub type ConnId = u64;

/// Room code alphabet: upper-case letters and digits minus the visually
/// ambiguous I, O, 0, 1.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Default number of characters in a room code.
pub const ROOM_CODE_LENGTH: usize = 6;

/// Generate a random room code of the given length.
pub fn generate_room_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form used for lookups: trimmed and upper-cased.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn is_valid_room_code(code: &str, length: usize) -> bool {
    code.len() == length && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    #[default]
    Waiting,
    Playing,
    Finished,
}

/// One seat in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSlot {
    pub conn_id: ConnId,
    pub name: String,
}

/// Win tallies across games in the same room. Updated only on natural game
/// ends, never on disconnect forfeits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStats {
    pub games_played: u32,
    pub host_wins: u32,
    pub guest_wins: u32,
}

impl MatchStats {
    pub fn record_win(&mut self, winner: PlayerRole) {
        self.games_played += 1;
        match winner {
            PlayerRole::Host => self.host_wins += 1,
            PlayerRole::Guest => self.guest_wins += 1,
        }
    }
}

/// A room: two seats, an optional running game, and its match history.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub host: PlayerSlot,
    pub guest: Option<PlayerSlot>,
    pub state: RoomState,
    /// Settings snapshot taken at creation; every game in the room uses it.
    pub settings: GameSettings,
    pub game: Option<GameEngine>,
    pub match_stats: MatchStats,
    /// Loser of the last natural game starts the next one.
    pub next_starting_player: PlayerRole,
    pub created_at: i64,
    pub game_started_at: Option<i64>,
}

impl Room {
    pub fn new(code: String, host: PlayerSlot, settings: GameSettings) -> Self {
        Self {
            code,
            host,
            guest: None,
            state: RoomState::Waiting,
            settings,
            game: None,
            match_stats: MatchStats::default(),
            next_starting_player: PlayerRole::Host,
            created_at: time::now_millis(),
            game_started_at: None,
        }
    }

    pub fn role_of(&self, conn_id: ConnId) -> Option<PlayerRole> {
        if self.host.conn_id == conn_id {
            return Some(PlayerRole::Host);
        }
        if self.guest.as_ref().is_some_and(|g| g.conn_id == conn_id) {
            return Some(PlayerRole::Guest);
        }
        None
    }

    pub fn slot(&self, role: PlayerRole) -> Option<&PlayerSlot> {
        match role {
            PlayerRole::Host => Some(&self.host),
            PlayerRole::Guest => self.guest.as_ref(),
        }
    }

    pub fn player_name(&self, role: PlayerRole) -> Option<&str> {
        self.slot(role).map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..200 {
            let code = generate_room_code(ROOM_CODE_LENGTH);
            assert!(is_valid_room_code(&code, ROOM_CODE_LENGTH), "bad code {code}");
        }
    }

    #[test]
    fn alphabet_excludes_ambiguous_characters() {
        for banned in [b'I', b'O', b'0', b'1'] {
            assert!(!ROOM_CODE_ALPHABET.contains(&banned));
        }
        assert_eq!(ROOM_CODE_ALPHABET.len(), 32);
    }

    #[test]
    fn normalization_uppercases_and_trims() {
        assert_eq!(normalize_room_code("  abc234 "), "ABC234");
    }

    #[test]
    fn invalid_codes_rejected() {
        assert!(!is_valid_room_code("", 6));
        assert!(!is_valid_room_code("ABC23", 6));
        assert!(!is_valid_room_code("ABC10X", 6));
        assert!(!is_valid_room_code("abc234", 6));
    }

    #[test]
    fn role_lookup() {
        let mut room = Room::new(
            "ABCDEF".into(),
            PlayerSlot {
                conn_id: 1,
                name: "Alice".into(),
            },
            GameSettings::default(),
        );
        assert_eq!(room.role_of(1), Some(PlayerRole::Host));
        assert_eq!(room.role_of(2), None);

        room.guest = Some(PlayerSlot {
            conn_id: 2,
            name: "Bob".into(),
        });
        assert_eq!(room.role_of(2), Some(PlayerRole::Guest));
        assert_eq!(room.player_name(PlayerRole::Guest), Some("Bob"));
    }

    #[test]
    fn match_stats_tally() {
        let mut stats = MatchStats::default();
        stats.record_win(PlayerRole::Host);
        stats.record_win(PlayerRole::Guest);
        stats.record_win(PlayerRole::Host);
        assert_eq!(stats.games_played, 3);
        assert_eq!(stats.host_wins, 2);
        assert_eq!(stats.guest_wins, 1);
    }
}
