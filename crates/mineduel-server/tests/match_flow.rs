#[allow(dead_code)]
mod common;

use common::*;

use mineduel_core::engine::{GameOverReason, PlayerRole, SettingsPatch};
use mineduel_core::net::messages::{ClientMessage, RevealTileMsg, ServerMessage};

async fn start_match(
    server: &TestServer,
    settings: Option<SettingsPatch>,
) -> (WsStream, WsStream, String) {
    let mut host = ws_connect(&server.ws_url()).await;
    let mut guest = ws_connect(&server.ws_url()).await;
    let code = create_room_with(&mut host, "Alice", settings).await;
    join_room(&mut guest, &code, "Bob").await;
    for stream in [&mut host, &mut guest] {
        ws_recv_until(stream, |m| matches!(m, ServerMessage::GameStart(_))).await;
    }
    (host, guest, code)
}

async fn reveal(stream: &mut WsStream, x: i32, z: i32) {
    ws_send(stream, &ClientMessage::RevealTile(RevealTileMsg { x, z })).await;
}

#[tokio::test]
async fn opening_reveal_starts_timer_without_scoring() {
    let server = TestServer::new().await;
    let (mut host, mut guest, _code) = start_match(&server, None).await;

    reveal(&mut host, 5, 5).await;
    for stream in [&mut host, &mut guest] {
        let msg = ws_recv_until(stream, |m| matches!(m, ServerMessage::TileRevealed(_))).await;
        let ServerMessage::TileRevealed(revealed) = msg else {
            unreachable!();
        };
        assert_eq!(revealed.player, PlayerRole::Host);
        assert!(!revealed.hit_mine, "opening click must be safe");
        assert!(!revealed.revealed_tiles.is_empty());
        assert_eq!(revealed.scores.host, 0, "opening click scores nothing");
        assert!(revealed.can_pass);
        assert_eq!(revealed.timer_started, Some(true));
        assert_eq!(revealed.time_remaining, Some(30));
    }
}

#[tokio::test]
async fn pass_hands_the_turn_over() {
    let server = TestServer::new().await;
    let (mut host, mut guest, _code) = start_match(&server, None).await;

    reveal(&mut host, 5, 5).await;
    ws_recv_until(&mut host, |m| matches!(m, ServerMessage::TileRevealed(_))).await;

    ws_send(&mut host, &ClientMessage::PassTurn).await;
    for stream in [&mut host, &mut guest] {
        let msg = ws_recv_until(stream, |m| matches!(m, ServerMessage::TurnChanged(_))).await;
        let ServerMessage::TurnChanged(turn) = msg else {
            unreachable!();
        };
        assert_eq!(turn.current_player, PlayerRole::Guest);
        assert_eq!(turn.previous_player, PlayerRole::Host);
        assert_eq!(turn.time_remaining, 30);
        assert!(turn.reason.is_none());
    }

    // Host no longer holds the turn
    reveal(&mut host, 0, 0).await;
    let msg = ws_recv_until(&mut host, |m| {
        matches!(m, ServerMessage::Error(_) | ServerMessage::TileRevealed(_))
    })
    .await;
    assert!(
        matches!(msg, ServerMessage::Error(_)),
        "out-of-turn reveal must be rejected: {msg:?}"
    );
}

#[tokio::test]
async fn pass_without_reveal_is_rejected() {
    let server = TestServer::new().await;
    let (mut host, _guest, _code) = start_match(&server, None).await;

    ws_send(&mut host, &ClientMessage::PassTurn).await;
    let msg = ws_recv_until(&mut host, |m| {
        matches!(m, ServerMessage::Error(_) | ServerMessage::TurnChanged(_))
    })
    .await;
    assert!(
        matches!(msg, ServerMessage::Error(_)),
        "pass before revealing must be rejected: {msg:?}"
    );
}

#[tokio::test]
async fn game_runs_to_a_natural_end() {
    let server = TestServer::new().await;
    // Dense small board so the host quickly hits a mine or clears it
    let (mut host, mut guest, _code) = start_match(
        &server,
        Some(SettingsPatch {
            grid_size: Some(5),
            mines_count: Some(8),
            ..SettingsPatch::default()
        }),
    )
    .await;

    let mut game_over = None;
    'sweep: for x in 0..5 {
        for z in 0..5 {
            reveal(&mut host, x, z).await;
            let msg = ws_recv_until(&mut host, |m| {
                matches!(
                    m,
                    ServerMessage::TileRevealed(_)
                        | ServerMessage::GameOver(_)
                        | ServerMessage::Error(_)
                )
            })
            .await;
            match msg {
                ServerMessage::GameOver(over) => {
                    game_over = Some(over);
                    break 'sweep;
                },
                ServerMessage::TileRevealed(revealed) if revealed.hit_mine => {
                    let msg = ws_recv_until(&mut host, |m| {
                        matches!(m, ServerMessage::GameOver(_))
                    })
                    .await;
                    let ServerMessage::GameOver(over) = msg else {
                        unreachable!();
                    };
                    game_over = Some(over);
                    break 'sweep;
                },
                // Already revealed by an earlier flood, or plain progress
                _ => {},
            }
        }
    }

    // A terminal on the very last swept tile leaves game_over unread
    let over = match game_over {
        Some(over) => over,
        None => {
            let msg =
                ws_recv_until(&mut host, |m| matches!(m, ServerMessage::GameOver(_))).await;
            let ServerMessage::GameOver(over) = msg else {
                unreachable!();
            };
            over
        },
    };
    match over.reason {
        GameOverReason::HitMine => {
            assert_eq!(over.winner, PlayerRole::Guest);
            assert_eq!(over.loser, PlayerRole::Host);
            assert!(!over.all_mines.is_empty());
        },
        GameOverReason::AllSafeRevealed => {
            assert_eq!(over.winner, PlayerRole::Host);
        },
        other => panic!("unexpected game over reason: {other:?}"),
    }
    assert_eq!(over.match_stats.games_played, 1);

    // The guest observes the same terminal
    let msg = ws_recv_until(&mut guest, |m| matches!(m, ServerMessage::GameOver(_))).await;
    let ServerMessage::GameOver(guest_view) = msg else {
        unreachable!();
    };
    assert_eq!(guest_view.winner, over.winner);
    assert_eq!(guest_view.reason, over.reason);
}

#[tokio::test]
async fn timeout_auto_passes_then_forfeits_the_idle_player() {
    let server = TestServer::new().await;
    let (mut host, mut guest, _code) = start_match(
        &server,
        Some(SettingsPatch {
            turn_time_limit: Some(1),
            ..SettingsPatch::default()
        }),
    )
    .await;

    // Host reveals once and then sits: the countdown auto-passes to guest.
    reveal(&mut host, 5, 5).await;
    ws_recv_until(&mut host, |m| matches!(m, ServerMessage::TileRevealed(_))).await;

    let msg = ws_recv_until(&mut host, |m| matches!(m, ServerMessage::TimeoutAction(_))).await;
    let ServerMessage::TimeoutAction(action) = msg else {
        unreachable!();
    };
    assert!(action.auto_passed);
    assert_eq!(action.player, PlayerRole::Host);
    assert_eq!(action.next_player, PlayerRole::Guest);

    let msg = ws_recv_until(&mut host, |m| matches!(m, ServerMessage::TurnChanged(_))).await;
    let ServerMessage::TurnChanged(turn) = msg else {
        unreachable!();
    };
    assert_eq!(turn.current_player, PlayerRole::Guest);
    assert_eq!(turn.reason.as_deref(), Some("timeout_auto_pass"));

    // Guest does nothing at all: the next timeout forfeits the game.
    for stream in [&mut host, &mut guest] {
        let msg = ws_recv_until(stream, |m| matches!(m, ServerMessage::GameOver(_))).await;
        let ServerMessage::GameOver(over) = msg else {
            unreachable!();
        };
        assert_eq!(over.reason, GameOverReason::TimeoutNoAction);
        assert_eq!(over.winner, PlayerRole::Host);
        assert_eq!(over.loser, PlayerRole::Guest);
        assert_eq!(over.match_stats.host_wins, 1);
    }
}

#[tokio::test]
async fn guest_disconnect_forfeits_to_host() {
    let server = TestServer::new().await;
    let (mut host, guest, code) = start_match(&server, None).await;

    let mut watcher = ws_connect(&server.ws_url()).await;
    spectate(&mut watcher, &code).await;
    ws_recv_until(&mut watcher, |m| matches!(m, ServerMessage::SpectateJoined(_))).await;

    drop(guest);

    for stream in [&mut host, &mut watcher] {
        let msg = ws_recv_until(stream, |m| matches!(m, ServerMessage::GameOver(_))).await;
        let ServerMessage::GameOver(over) = msg else {
            unreachable!();
        };
        assert_eq!(over.reason, GameOverReason::OpponentDisconnected);
        assert_eq!(over.winner, PlayerRole::Host);
        // Forfeits never count toward the match tally
        assert_eq!(over.match_stats.games_played, 0);
    }
}

#[tokio::test]
async fn host_disconnect_closes_the_room_for_spectators() {
    let server = TestServer::new().await;
    let (host, mut guest, code) = start_match(&server, None).await;

    let mut watcher = ws_connect(&server.ws_url()).await;
    spectate(&mut watcher, &code).await;
    ws_recv_until(&mut watcher, |m| matches!(m, ServerMessage::SpectateJoined(_))).await;

    drop(host);

    // The guest wins by forfeit, spectators see the room close.
    let msg = ws_recv_until(&mut guest, |m| matches!(m, ServerMessage::GameOver(_))).await;
    let ServerMessage::GameOver(over) = msg else {
        unreachable!();
    };
    assert_eq!(over.winner, PlayerRole::Guest);
    assert_eq!(over.reason, GameOverReason::OpponentDisconnected);

    let msg = ws_recv_until(&mut watcher, |m| matches!(m, ServerMessage::RoomClosed(_))).await;
    let ServerMessage::RoomClosed(closed) = msg else {
        unreachable!();
    };
    assert_eq!(closed.reason, "host_left");
}

#[tokio::test]
async fn restart_flow_starts_a_fresh_game() {
    let server = TestServer::new().await;
    let (mut host, mut guest, _code) = start_match(
        &server,
        Some(SettingsPatch {
            turn_time_limit: Some(1),
            ..SettingsPatch::default()
        }),
    )
    .await;

    // The countdown only starts on the opening reveal; after it, the host
    // auto-passes once, then the idle guest forfeits.
    reveal(&mut host, 5, 5).await;
    for stream in [&mut host, &mut guest] {
        let msg = ws_recv_until(stream, |m| matches!(m, ServerMessage::GameOver(_))).await;
        let ServerMessage::GameOver(over) = msg else {
            unreachable!();
        };
        assert_eq!(over.loser, PlayerRole::Guest);
    }

    ws_send(&mut host, &ClientMessage::RequestRestart).await;
    let msg = ws_recv_until(&mut guest, |m| matches!(m, ServerMessage::RestartRequested(_))).await;
    let ServerMessage::RestartRequested(req) = msg else {
        unreachable!();
    };
    assert_eq!(req.from, PlayerRole::Host);

    ws_send(&mut guest, &ClientMessage::AcceptRestart).await;
    for stream in [&mut host, &mut guest] {
        let msg = ws_recv_until(stream, |m| matches!(m, ServerMessage::GameStart(_))).await;
        let ServerMessage::GameStart(start) = msg else {
            unreachable!();
        };
        // The guest lost the first game on timeout, so the guest starts
        assert_eq!(start.current_player, PlayerRole::Guest);
        assert!(start.is_first_move);
    }
}
