use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{
    GameOverReason, GameSettings, GameSnapshot, PlayerRole, RevealedTile, Scores, SettingsPatch,
};
use crate::grid::{MinePos, TileSnapshot};
use crate::room::{MatchStats, RoomState};
use crate::time;

/// Intents arriving on the player channel. The wire format is JSON with a
/// `type` discriminator, e.g. `{"type":"reveal_tile","x":3,"z":4}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom(CreateRoomMsg),
    JoinRoom(JoinRoomMsg),
    RevealTile(RevealTileMsg),
    PassTurn,
    RequestRestart,
    AcceptRestart,
    PublicSpectate(SpectateMsg),
    LeaveSpectate,
    SendDanmaku(SendDanmakuMsg),
    UpdatePlayerName(UpdatePlayerNameMsg),
}

/// Intents arriving on the admin channel (after the bearer handshake).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminClientMessage {
    SubscribeRooms,
    AdminSpectate(SpectateMsg),
    LeaveSpectate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomMsg {
    pub player_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsPatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMsg {
    pub room_code: String,
    pub player_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealTileMsg {
    pub x: i32,
    pub z: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectateMsg {
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDanmakuMsg {
    pub room_code: String,
    pub message: String,
    pub nickname: String,
    #[serde(default)]
    pub is_player: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayerNameMsg {
    pub new_name: String,
}

/// Everything the server pushes, across the player, spectator, and admin
/// audiences. One enum keeps the dispatch exhaustive; which variants a given
/// connection sees depends on its audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated(RoomCreatedMsg),
    RoomJoined(RoomJoinedMsg),
    JoinError(ErrorMsg),
    RedirectToSpectate(RedirectToSpectateMsg),
    PlayerJoined(PlayerJoinedMsg),
    GameStart(GameStartMsg),
    TileRevealed(TileRevealedMsg),
    TurnChanged(TurnChangedMsg),
    TimerUpdate(TimerUpdateMsg),
    TimeoutAction(TimeoutActionMsg),
    GameOver(GameOverMsg),
    RestartRequested(RestartRequestedMsg),
    SpectatorCountUpdate(SpectatorCountUpdateMsg),
    Danmaku(DanmakuBroadcast),
    PlayerNameUpdated(PlayerNameUpdatedMsg),
    Error(ErrorMsg),
    SpectateJoined(SpectateJoinedMsg),
    SpectateError(ErrorMsg),
    RoomClosed(RoomClosedMsg),
    AdminRoomsUpdate(AdminRoomsUpdateMsg),
    AdminError(ErrorMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMsg {
    pub error: String,
}

impl ErrorMsg {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreatedMsg {
    pub room_code: String,
    pub player_role: PlayerRole,
    pub settings: GameSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedMsg {
    pub room_code: String,
    pub player_role: PlayerRole,
    pub host_name: String,
    pub settings: GameSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectToSpectateMsg {
    pub room_code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoinedMsg {
    pub opponent: String,
}

/// Game start snapshot. Players receive the masked grid; the spectator copy
/// carries the god view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartMsg {
    pub grid: Vec<TileSnapshot>,
    pub grid_size: usize,
    pub mines_count: usize,
    pub current_player: PlayerRole,
    pub turn_time_limit: u32,
    pub time_remaining: Option<u32>,
    pub is_first_move: bool,
    pub host: String,
    pub guest: String,
    pub match_stats: MatchStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRevealedMsg {
    pub x: i32,
    pub z: i32,
    pub player: PlayerRole,
    pub hit_mine: bool,
    pub revealed_tiles: Vec<RevealedTile>,
    pub can_pass: bool,
    pub reveals_this_turn: u32,
    pub scores: Scores,
    pub time_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_started: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnChangedMsg {
    pub current_player: PlayerRole,
    pub previous_player: PlayerRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<Scores>,
    pub time_remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `reason` value on `turn_changed` after a timeout auto-pass.
pub const TURN_REASON_TIMEOUT_AUTO_PASS: &str = "timeout_auto_pass";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdateMsg {
    pub time_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutActionMsg {
    pub player: PlayerRole,
    pub auto_passed: bool,
    pub next_player: PlayerRole,
    pub time_remaining: u32,
    pub scores: Scores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverMsg {
    pub winner: PlayerRole,
    pub loser: PlayerRole,
    pub reason: GameOverReason,
    pub scores: Scores,
    pub all_mines: Vec<MinePos>,
    pub match_stats: MatchStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequestedMsg {
    pub from: PlayerRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectatorCountUpdateMsg {
    pub count: usize,
}

/// A chat message as fanned out to every audience (and journaled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DanmakuBroadcast {
    pub id: String,
    pub nickname: String,
    pub message: String,
    pub timestamp: i64,
    pub is_player: bool,
}

impl DanmakuBroadcast {
    pub fn new(nickname: String, message: String, is_player: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            nickname,
            message,
            timestamp: time::now_millis(),
            is_player,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerNameUpdatedMsg {
    pub role: PlayerRole,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectateJoinedMsg {
    pub room_code: String,
    pub host_name: String,
    pub guest_name: Option<String>,
    pub spectator_count: usize,
    pub game_state: RoomState,
    /// God-view snapshot of the running game, if any.
    pub game: Option<GameSnapshot>,
    pub match_stats: MatchStats,
    pub message_history: Vec<DanmakuBroadcast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomClosedMsg {
    pub reason: String,
    pub message: String,
}

/// Per-room projection for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub code: String,
    pub state: RoomState,
    pub host_name: String,
    pub guest_name: Option<String>,
    pub settings: GameSettings,
    pub created_at: i64,
    pub game_started_at: Option<i64>,
    /// Seconds since the current game started, while playing.
    pub play_duration: Option<i64>,
    pub spectator_count: usize,
    pub current_player: Option<PlayerRole>,
    pub time_remaining: Option<u32>,
    pub scores: Option<Scores>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRoomsUpdateMsg {
    pub total_rooms: usize,
    pub playing_count: usize,
    pub waiting_count: usize,
    pub finished_count: usize,
    pub rooms: Vec<RoomStats>,
}
