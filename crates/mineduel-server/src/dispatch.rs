use std::time::{Duration, Instant};

use bytes::Bytes;

use mineduel_core::engine::{
    GameOverReason, PlayerRole, RevealOutcome, Scores, TickOutcome, TimeoutOutcome,
};
use mineduel_core::grid::MinePos;
use mineduel_core::net::messages::{
    ClientMessage, CreateRoomMsg, DanmakuBroadcast, ErrorMsg, GameOverMsg, GameStartMsg,
    JoinRoomMsg, PlayerJoinedMsg, PlayerNameUpdatedMsg, RedirectToSpectateMsg, RestartRequestedMsg,
    RevealTileMsg, RoomClosedMsg, RoomCreatedMsg, RoomJoinedMsg, SendDanmakuMsg, ServerMessage,
    SpectateJoinedMsg, SpectateMsg, SpectatorCountUpdateMsg, TURN_REASON_TIMEOUT_AUTO_PASS,
    TileRevealedMsg, TimeoutActionMsg, TimerUpdateMsg, TurnChangedMsg, UpdatePlayerNameMsg,
};
use mineduel_core::net::protocol::encode_server_message;
use mineduel_core::room::{ConnId, RoomState};
use mineduel_core::time;

use crate::admin;
use crate::journal::{GameResultRecord, JournalCmd, JournalHandle, MoveAction, MoveRecord};
use crate::registry::{ClientSender, JoinRejection, LeaveOutcome, RoomEntry, RoomRegistry};
use crate::state::AppState;

/// Player names and chat nicknames are truncated to this many code points.
const MAX_NAME_CHARS: usize = 10;
/// Chat messages are truncated to this many code points.
const MAX_CHAT_CHARS: usize = 50;

/// Trim and truncate a player name or nickname; empty results are invalid.
fn normalize_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_NAME_CHARS).collect())
}

/// Trim and truncate a chat message; empty results are invalid.
fn normalize_chat(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_CHAT_CHARS).collect())
}

fn encode(msg: &ServerMessage) -> Option<String> {
    match encode_server_message(msg) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server message");
            None
        },
    }
}

/// Send one message to one connection, dropping it if the channel is full.
pub fn send_message(tx: &ClientSender, msg: &ServerMessage) {
    if let Some(text) = encode(msg)
        && tx.try_send(Bytes::from(text)).is_err()
    {
        tracing::debug!("Dropping message to slow or closed connection");
    }
}

fn send_error(tx: &ClientSender, error: impl Into<String>) {
    send_message(tx, &ServerMessage::Error(ErrorMsg::new(error)));
}

/// Route one decoded player intent. This is the only place client intents
/// touch the registry and engine, which keeps the per-room event order equal
/// to the engine transition order.
pub async fn handle_client_message(
    state: &AppState,
    conn_id: ConnId,
    tx: &ClientSender,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::CreateRoom(m) => handle_create_room(state, conn_id, tx, m).await,
        ClientMessage::JoinRoom(m) => handle_join_room(state, conn_id, tx, m).await,
        ClientMessage::RevealTile(m) => handle_reveal_tile(state, conn_id, tx, m).await,
        ClientMessage::PassTurn => handle_pass_turn(state, conn_id, tx).await,
        ClientMessage::RequestRestart => handle_request_restart(state, conn_id, tx).await,
        ClientMessage::AcceptRestart => handle_accept_restart(state, conn_id, tx).await,
        ClientMessage::PublicSpectate(m) => handle_public_spectate(state, conn_id, tx, m).await,
        ClientMessage::LeaveSpectate => handle_leave_spectate(state, conn_id).await,
        ClientMessage::SendDanmaku(m) => handle_danmaku(state, conn_id, tx, m).await,
        ClientMessage::UpdatePlayerName(m) => handle_update_name(state, conn_id, tx, m).await,
    }
}

async fn handle_create_room(state: &AppState, conn_id: ConnId, tx: &ClientSender, m: CreateRoomMsg) {
    let Some(name) = normalize_name(&m.player_name) else {
        send_error(tx, "Invalid player name");
        return;
    };

    let defaults = state.config.game.settings();
    let settings = m.settings.map_or(defaults, |p| p.apply_to(defaults));

    let code = {
        let mut rooms = state.rooms.write().await;
        if rooms.is_player(conn_id) || rooms.is_spectator(conn_id) {
            send_error(tx, "Already in a room");
            return;
        }
        let code = rooms.create_room(conn_id, name, settings, tx.clone());
        if let Some(entry) = rooms.get_entry(&code) {
            state.journals.open_room(&entry.room);
        }
        code
    };

    tracing::info!(conn_id, room = %code, "Room created");
    send_message(
        tx,
        &ServerMessage::RoomCreated(RoomCreatedMsg {
            room_code: code,
            player_role: PlayerRole::Host,
            settings,
        }),
    );
    admin::push_rooms_update(state).await;
}

async fn handle_join_room(state: &AppState, conn_id: ConnId, tx: &ClientSender, m: JoinRoomMsg) {
    let Some(name) = normalize_name(&m.player_name) else {
        send_message(
            tx,
            &ServerMessage::JoinError(ErrorMsg::new("Invalid player name")),
        );
        return;
    };

    let mut rooms = state.rooms.write().await;
    if rooms.is_player(conn_id) || rooms.is_spectator(conn_id) {
        send_message(tx, &ServerMessage::JoinError(ErrorMsg::new("Already in a room")));
        return;
    }

    let code = match rooms.join_room(&m.room_code, conn_id, name.clone(), tx.clone()) {
        Ok(code) => code,
        Err(JoinRejection::NotFound) => {
            send_message(tx, &ServerMessage::JoinError(ErrorMsg::new("Room not found")));
            return;
        },
        Err(JoinRejection::Full) => {
            send_message(tx, &ServerMessage::JoinError(ErrorMsg::new("Room is full")));
            return;
        },
        Err(JoinRejection::InProgress { code }) => {
            send_message(
                tx,
                &ServerMessage::RedirectToSpectate(RedirectToSpectateMsg {
                    room_code: code,
                    message: "Game already in progress, you can watch instead".to_string(),
                }),
            );
            return;
        },
        Err(JoinRejection::Finished { code }) => {
            send_message(
                tx,
                &ServerMessage::RedirectToSpectate(RedirectToSpectateMsg {
                    room_code: code,
                    message: "Game has finished, you can watch instead".to_string(),
                }),
            );
            return;
        },
    };

    let Some(entry) = rooms.get_entry_mut(&code) else {
        return;
    };

    send_message(
        tx,
        &ServerMessage::RoomJoined(RoomJoinedMsg {
            room_code: code.clone(),
            player_role: PlayerRole::Guest,
            host_name: entry.room.host.name.clone(),
            settings: entry.room.settings,
        }),
    );
    if let Some(text) = encode(&ServerMessage::PlayerJoined(PlayerJoinedMsg {
        opponent: name.clone(),
    })) {
        entry.send_to_role(PlayerRole::Host, &text);
    }

    state.journals.send(&code, JournalCmd::GuestJoined(name));

    // Both seats are taken: the game starts immediately.
    RoomRegistry::start_game(entry);
    broadcast_game_start(entry);
    journal_game_started(&state.journals, entry);

    tracing::info!(conn_id, room = %code, "Guest joined, game started");
    drop(rooms);
    admin::push_rooms_update(state).await;
}

async fn handle_reveal_tile(state: &AppState, conn_id: ConnId, tx: &ClientSender, m: RevealTileMsg) {
    let mut push_admin = false;
    {
        let mut rooms = state.rooms.write().await;
        let Some((entry, role)) = rooms.player_room_mut(conn_id) else {
            send_error(tx, "You are not in a room");
            return;
        };
        let code = entry.room.code.clone();
        let Some(engine) = entry.room.game.as_mut() else {
            send_error(tx, "game is not in progress");
            return;
        };

        match engine.reveal_tile(m.x, m.z, role) {
            Err(e) => send_error(tx, e.to_string()),
            Ok(RevealOutcome::Continue {
                revealed_tiles,
                can_pass,
                reveals_this_turn,
                scores,
                time_remaining,
                timer_started,
            }) => {
                let revealed_count = revealed_tiles.len();
                let msg = ServerMessage::TileRevealed(TileRevealedMsg {
                    x: m.x,
                    z: m.z,
                    player: role,
                    hit_mine: false,
                    revealed_tiles,
                    can_pass,
                    reveals_this_turn,
                    scores,
                    time_remaining,
                    timer_started: timer_started.then_some(true),
                });
                if let Some(text) = encode(&msg) {
                    entry.fan_out(&text, &text);
                }
                journal_move(
                    &state.journals,
                    &code,
                    role,
                    MoveAction::Reveal {
                        x: m.x,
                        z: m.z,
                        revealed: revealed_count,
                        hit_mine: false,
                    },
                );
                if timer_started {
                    entry.timer_task = Some(spawn_turn_timer(state.clone(), code));
                }
            },
            Ok(RevealOutcome::MineHit {
                revealed,
                winner,
                loser,
                scores,
                all_mines,
            }) => {
                let reveals_this_turn = engine.reveals_this_turn();
                let msg = ServerMessage::TileRevealed(TileRevealedMsg {
                    x: m.x,
                    z: m.z,
                    player: role,
                    hit_mine: true,
                    revealed_tiles: vec![revealed],
                    can_pass: false,
                    reveals_this_turn,
                    scores,
                    time_remaining: None,
                    timer_started: None,
                });
                if let Some(text) = encode(&msg) {
                    entry.fan_out(&text, &text);
                }
                journal_move(
                    &state.journals,
                    &code,
                    role,
                    MoveAction::Reveal {
                        x: m.x,
                        z: m.z,
                        revealed: 1,
                        hit_mine: true,
                    },
                );
                conclude_game(
                    entry,
                    &state.journals,
                    winner,
                    loser,
                    GameOverReason::HitMine,
                    scores,
                    all_mines,
                );
                push_admin = true;
            },
            Ok(RevealOutcome::AllSafeRevealed {
                revealed_tiles,
                winner,
                loser,
                scores,
                all_mines,
            }) => {
                let reveals_this_turn = engine.reveals_this_turn();
                let revealed_count = revealed_tiles.len();
                let msg = ServerMessage::TileRevealed(TileRevealedMsg {
                    x: m.x,
                    z: m.z,
                    player: role,
                    hit_mine: false,
                    revealed_tiles,
                    can_pass: false,
                    reveals_this_turn,
                    scores,
                    time_remaining: None,
                    timer_started: None,
                });
                if let Some(text) = encode(&msg) {
                    entry.fan_out(&text, &text);
                }
                journal_move(
                    &state.journals,
                    &code,
                    role,
                    MoveAction::Reveal {
                        x: m.x,
                        z: m.z,
                        revealed: revealed_count,
                        hit_mine: false,
                    },
                );
                conclude_game(
                    entry,
                    &state.journals,
                    winner,
                    loser,
                    GameOverReason::AllSafeRevealed,
                    scores,
                    all_mines,
                );
                push_admin = true;
            },
        }
    }
    if push_admin {
        admin::push_rooms_update(state).await;
    }
}

async fn handle_pass_turn(state: &AppState, conn_id: ConnId, tx: &ClientSender) {
    let mut rooms = state.rooms.write().await;
    let Some((entry, role)) = rooms.player_room_mut(conn_id) else {
        send_error(tx, "You are not in a room");
        return;
    };
    let code = entry.room.code.clone();
    let Some(engine) = entry.room.game.as_mut() else {
        send_error(tx, "game is not in progress");
        return;
    };

    match engine.pass_turn(role) {
        Err(e) => send_error(tx, e.to_string()),
        Ok(pass) => {
            let msg = ServerMessage::TurnChanged(TurnChangedMsg {
                current_player: pass.next_player,
                previous_player: role,
                scores: Some(pass.scores),
                time_remaining: pass.time_remaining,
                reason: None,
            });
            if let Some(text) = encode(&msg) {
                entry.fan_out(&text, &text);
            }
            journal_move(&state.journals, &code, role, MoveAction::Pass);
        },
    }
}

async fn handle_request_restart(state: &AppState, conn_id: ConnId, tx: &ClientSender) {
    let rooms = state.rooms.read().await;
    let Some((entry, role)) = rooms.player_room(conn_id) else {
        send_error(tx, "You are not in a room");
        return;
    };
    if entry.room.guest.is_none() {
        send_error(tx, "No opponent to restart with");
        return;
    }
    if let Some(text) = encode(&ServerMessage::RestartRequested(RestartRequestedMsg {
        from: role,
    })) {
        entry.send_to_role(role.opponent(), &text);
    }
}

async fn handle_accept_restart(state: &AppState, conn_id: ConnId, tx: &ClientSender) {
    {
        let mut rooms = state.rooms.write().await;
        let Some((entry, _)) = rooms.player_room_mut(conn_id) else {
            send_error(tx, "You are not in a room");
            return;
        };
        if entry.room.state == RoomState::Playing {
            send_error(tx, "game is still in progress");
            return;
        }
        if entry.room.guest.is_none() {
            send_error(tx, "No opponent to restart with");
            return;
        }

        RoomRegistry::start_game(entry);
        broadcast_game_start(entry);
        journal_game_started(&state.journals, entry);
        tracing::info!(room = %entry.room.code, "Rematch started");
    }
    admin::push_rooms_update(state).await;
}

async fn handle_public_spectate(
    state: &AppState,
    conn_id: ConnId,
    tx: &ClientSender,
    m: SpectateMsg,
) {
    let mut rooms = state.rooms.write().await;
    if rooms.is_player(conn_id) {
        send_message(
            tx,
            &ServerMessage::SpectateError(ErrorMsg::new("Players cannot spectate")),
        );
        return;
    }

    // A connection watches at most one room; switching implies leaving.
    let previous = rooms.remove_spectator(conn_id);

    let Some((code, count)) = rooms.add_spectator(&m.room_code, conn_id, tx.clone()) else {
        send_message(
            tx,
            &ServerMessage::SpectateError(ErrorMsg::new("Room not found")),
        );
        if let Some((prev_code, prev_count)) = previous {
            broadcast_spectator_count(&rooms, &prev_code, prev_count);
        }
        return;
    };

    if let Some(entry) = rooms.get_entry(&code) {
        send_message(
            tx,
            &ServerMessage::SpectateJoined(SpectateJoinedMsg {
                room_code: code.clone(),
                host_name: entry.room.host.name.clone(),
                guest_name: entry.room.guest.as_ref().map(|g| g.name.clone()),
                spectator_count: count,
                game_state: entry.room.state,
                game: entry.room.game.as_ref().map(|g| g.spectator_snapshot()),
                match_stats: entry.room.match_stats,
                message_history: entry.chat_history.clone(),
            }),
        );
    }
    broadcast_spectator_count(&rooms, &code, count);

    if let Some((prev_code, prev_count)) = previous
        && prev_code != code
    {
        broadcast_spectator_count(&rooms, &prev_code, prev_count);
    }
}

async fn handle_leave_spectate(state: &AppState, conn_id: ConnId) {
    let mut rooms = state.rooms.write().await;
    if let Some((code, count)) = rooms.remove_spectator(conn_id) {
        broadcast_spectator_count(&rooms, &code, count);
    }
}

async fn handle_danmaku(state: &AppState, conn_id: ConnId, tx: &ClientSender, m: SendDanmakuMsg) {
    // Per-connection cooldown; over-rate messages are dropped silently.
    let cooldown = Duration::from_millis(state.config.limits.chat_cooldown_ms);
    if let Ok(cooldowns) = state.chat_cooldowns.lock()
        && let Some(last) = cooldowns.get(&conn_id)
        && last.elapsed() < cooldown
    {
        tracing::debug!(conn_id, "Chat rate limited");
        return;
    }

    let Some(nickname) = normalize_name(&m.nickname) else {
        send_error(tx, "Invalid nickname");
        return;
    };
    let Some(message) = normalize_chat(&m.message) else {
        send_error(tx, "Empty message");
        return;
    };

    let mut rooms = state.rooms.write().await;
    let Some(entry) = rooms.get_entry_mut(&m.room_code) else {
        send_error(tx, "Room not found");
        return;
    };

    if let Ok(mut cooldowns) = state.chat_cooldowns.lock() {
        cooldowns.insert(conn_id, Instant::now());
    }

    // Clients claim player status; trust it only for actual players.
    let is_player = m.is_player && entry.room.role_of(conn_id).is_some();
    let record = DanmakuBroadcast::new(nickname, message, is_player);

    if let Some(text) = encode(&ServerMessage::Danmaku(record.clone())) {
        entry.fan_out(&text, &text);
    }
    let code = entry.room.code.clone();
    entry.push_chat(record.clone());
    state.journals.send(&code, JournalCmd::Chat(record));
}

async fn handle_update_name(
    state: &AppState,
    conn_id: ConnId,
    tx: &ClientSender,
    m: UpdatePlayerNameMsg,
) {
    let Some(name) = normalize_name(&m.new_name) else {
        send_error(tx, "Invalid player name");
        return;
    };

    {
        let mut rooms = state.rooms.write().await;
        let Some((entry, role)) = rooms.player_room_mut(conn_id) else {
            send_error(tx, "You are not in a room");
            return;
        };
        match role {
            PlayerRole::Host => entry.room.host.name = name.clone(),
            PlayerRole::Guest => {
                if let Some(guest) = entry.room.guest.as_mut() {
                    guest.name = name.clone();
                }
            },
        }
        let msg = ServerMessage::PlayerNameUpdated(PlayerNameUpdatedMsg {
            role,
            new_name: name.clone(),
        });
        if let Some(text) = encode(&msg) {
            entry.fan_out(&text, &text);
        }
        state.journals.send(
            &entry.room.code,
            JournalCmd::Event(crate::journal::EventRecord {
                at: time::now_millis(),
                event: "player_renamed".to_string(),
                detail: Some(name),
            }),
        );
    }
    admin::push_rooms_update(state).await;
}

/// A connection dropped. Players forfeit running games; spectators just
/// leave their room's audience.
pub async fn handle_disconnect(state: &AppState, conn_id: ConnId) {
    if let Ok(mut cooldowns) = state.chat_cooldowns.lock() {
        cooldowns.remove(&conn_id);
    }

    let mut push_admin = false;
    {
        let mut rooms = state.rooms.write().await;
        match rooms.leave_room(conn_id) {
            Some(LeaveOutcome::HostLeft { mut entry }) => {
                let code = entry.room.code.clone();
                let was_playing =
                    entry.room.state == RoomState::Playing && entry.room.guest.is_some();
                if was_playing {
                    let scores = entry.room.game.as_ref().map(|g| g.scores()).unwrap_or_default();
                    let mines = entry
                        .room
                        .game
                        .as_ref()
                        .map(|g| g.all_mines())
                        .unwrap_or_default();
                    let over = finish_game(
                        &mut entry,
                        PlayerRole::Guest,
                        PlayerRole::Host,
                        GameOverReason::OpponentDisconnected,
                        scores,
                        mines,
                    );
                    journal_game_ended(&state.journals, &code, &over);
                    if let Some(text) = encode(&ServerMessage::GameOver(over)) {
                        entry.send_to_role(PlayerRole::Guest, &text);
                    }
                }
                let closed = ServerMessage::RoomClosed(RoomClosedMsg {
                    reason: "host_left".to_string(),
                    message: "The host left the room".to_string(),
                });
                if let Some(text) = encode(&closed) {
                    entry.fan_out_watchers(&text);
                    if !was_playing {
                        entry.fan_out_players(&text);
                    }
                }
                state.journals.send(
                    &code,
                    JournalCmd::Event(crate::journal::EventRecord {
                        at: time::now_millis(),
                        event: "host_left".to_string(),
                        detail: None,
                    }),
                );
                state.journals.archive(&code);
                tracing::info!(conn_id, room = %code, "Host disconnected, room closed");
                push_admin = true;
            },
            Some(LeaveOutcome::GuestLeft {
                code,
                guest_name,
                was_playing,
            }) => {
                if was_playing {
                    if let Some(entry) = rooms.get_entry_mut(&code) {
                        let scores =
                            entry.room.game.as_ref().map(|g| g.scores()).unwrap_or_default();
                        let mines = entry
                            .room
                            .game
                            .as_ref()
                            .map(|g| g.all_mines())
                            .unwrap_or_default();
                        let over = finish_game(
                            entry,
                            PlayerRole::Host,
                            PlayerRole::Guest,
                            GameOverReason::OpponentDisconnected,
                            scores,
                            mines,
                        );
                        journal_game_ended(&state.journals, &code, &over);
                        if let Some(text) = encode(&ServerMessage::GameOver(over)) {
                            entry.fan_out(&text, &text);
                        }
                    }
                    tracing::info!(conn_id, room = %code, "Guest disconnected mid-game, forfeit");
                } else {
                    state.journals.send(
                        &code,
                        JournalCmd::Event(crate::journal::EventRecord {
                            at: time::now_millis(),
                            event: "guest_left".to_string(),
                            detail: Some(guest_name),
                        }),
                    );
                }
                push_admin = true;
            },
            None => {
                if let Some((code, count)) = rooms.remove_spectator(conn_id) {
                    broadcast_spectator_count(&rooms, &code, count);
                    push_admin = true;
                }
            },
        }
    }
    if push_admin {
        admin::push_rooms_update(state).await;
    }
}

/// Broadcast the masked game-start snapshot to players and the god view to
/// spectators and admins.
fn broadcast_game_start(entry: &RoomEntry) {
    let Some(engine) = entry.room.game.as_ref() else {
        return;
    };
    let base = GameStartMsg {
        grid: engine.client_grid(),
        grid_size: entry.room.settings.grid_size,
        mines_count: entry.room.settings.mines_count,
        current_player: engine.current_player(),
        turn_time_limit: entry.room.settings.turn_time_limit,
        time_remaining: None,
        is_first_move: true,
        host: entry.room.host.name.clone(),
        guest: entry
            .room
            .guest
            .as_ref()
            .map(|g| g.name.clone())
            .unwrap_or_default(),
        match_stats: entry.room.match_stats,
    };
    let watcher = GameStartMsg {
        grid: engine.spectator_grid(),
        ..base.clone()
    };
    if let (Some(player_text), Some(watcher_text)) = (
        encode(&ServerMessage::GameStart(base)),
        encode(&ServerMessage::GameStart(watcher)),
    ) {
        entry.fan_out(&player_text, &watcher_text);
    }
}

fn broadcast_spectator_count(rooms: &RoomRegistry, code: &str, count: usize) {
    if let Some(entry) = rooms.get_entry(code)
        && let Some(text) = encode(&ServerMessage::SpectatorCountUpdate(
            SpectatorCountUpdateMsg { count },
        ))
    {
        entry.fan_out(&text, &text);
    }
}

/// Terminal transition for a room: stop the countdown, stamp stats on
/// natural ends, drop the engine, and build the `game_over` payload.
fn finish_game(
    entry: &mut RoomEntry,
    winner: PlayerRole,
    loser: PlayerRole,
    reason: GameOverReason,
    scores: Scores,
    all_mines: Vec<MinePos>,
) -> GameOverMsg {
    entry.stop_timer();
    if reason.is_natural() {
        entry.room.match_stats.record_win(winner);
        entry.room.next_starting_player = loser;
    }
    entry.room.state = RoomState::Finished;
    entry.room.game = None;
    GameOverMsg {
        winner,
        loser,
        reason,
        scores,
        all_mines,
        match_stats: entry.room.match_stats,
    }
}

/// `finish_game` plus the broadcast and journal record, for natural ends.
fn conclude_game(
    entry: &mut RoomEntry,
    journals: &JournalHandle,
    winner: PlayerRole,
    loser: PlayerRole,
    reason: GameOverReason,
    scores: Scores,
    all_mines: Vec<MinePos>,
) {
    let code = entry.room.code.clone();
    let over = finish_game(entry, winner, loser, reason, scores, all_mines);
    journal_game_ended(journals, &code, &over);
    if let Some(text) = encode(&ServerMessage::GameOver(over)) {
        entry.fan_out(&text, &text);
    }
}

fn journal_move(journals: &JournalHandle, code: &str, player: PlayerRole, action: MoveAction) {
    journals.send(
        code,
        JournalCmd::Move(MoveRecord {
            at: time::now_millis(),
            player,
            action,
        }),
    );
}

fn journal_game_started(journals: &JournalHandle, entry: &RoomEntry) {
    if let Some(engine) = entry.room.game.as_ref() {
        journals.send(
            &entry.room.code,
            JournalCmd::GameStarted {
                at: entry.room.game_started_at.unwrap_or_else(time::now_millis),
                starting_player: engine.starting_player(),
                settings: entry.room.settings,
            },
        );
    }
}

fn journal_game_ended(journals: &JournalHandle, code: &str, over: &GameOverMsg) {
    journals.send(
        code,
        JournalCmd::GameEnded {
            at: time::now_millis(),
            result: GameResultRecord {
                winner: over.winner,
                loser: over.loser,
                reason: over.reason,
                scores: over.scores,
            },
        },
    );
}

/// One 1 Hz countdown task per running game, started on the game's first
/// accepted reveal and stopped when the game ends or the room goes away.
pub fn spawn_turn_timer(state: AppState, code: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let (keep_going, push_admin) = tick_room(&state, &code).await;
                    if push_admin {
                        admin::push_rooms_update(&state).await;
                    }
                    if !keep_going {
                        break;
                    }
                }
            }
        }
    })
}

/// Advance one room's countdown. Returns (keep ticking, push admin stats).
async fn tick_room(state: &AppState, code: &str) -> (bool, bool) {
    let mut rooms = state.rooms.write().await;
    let Some(entry) = rooms.get_entry_mut(code) else {
        return (false, false);
    };
    let Some(engine) = entry.room.game.as_mut() else {
        return (false, false);
    };

    match engine.tick_second() {
        TickOutcome::Idle => (false, false),
        TickOutcome::Tick { time_remaining } => {
            if let Some(text) = encode(&ServerMessage::TimerUpdate(TimerUpdateMsg {
                time_remaining,
            })) {
                entry.fan_out(&text, &text);
            }
            (true, false)
        },
        TickOutcome::Timeout(TimeoutOutcome::AutoPassed {
            player,
            next_player,
            scores,
            time_remaining,
        }) => {
            let timeout_msg = ServerMessage::TimeoutAction(TimeoutActionMsg {
                player,
                auto_passed: true,
                next_player,
                time_remaining,
                scores,
            });
            let turn_msg = ServerMessage::TurnChanged(TurnChangedMsg {
                current_player: next_player,
                previous_player: player,
                scores: Some(scores),
                time_remaining,
                reason: Some(TURN_REASON_TIMEOUT_AUTO_PASS.to_string()),
            });
            if let Some(text) = encode(&timeout_msg) {
                entry.fan_out(&text, &text);
            }
            if let Some(text) = encode(&turn_msg) {
                entry.fan_out(&text, &text);
            }
            journal_move(&state.journals, code, player, MoveAction::TimeoutAutoPass);
            (true, false)
        },
        TickOutcome::Timeout(TimeoutOutcome::Forfeit {
            winner,
            loser,
            scores,
            all_mines,
        }) => {
            // This IS the timer task; detach the handle so finishing the
            // game does not abort ourselves before the admin push runs.
            entry.timer_task.take();
            conclude_game(
                entry,
                &state.journals,
                winner,
                loser,
                GameOverReason::TimeoutNoAction,
                scores,
                all_mines,
            );
            (false, true)
        },
    }
}
