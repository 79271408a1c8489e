use std::collections::VecDeque;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{Grid, MinePos, TileSnapshot};

/// Points granted per safe tile revealed after the opening click.
pub const POINTS_PER_TILE: u32 = 10;

/// Which seat a player occupies. The host created the room and starts the
/// first game; afterwards the previous loser starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerRole {
    Host,
    Guest,
}

impl PlayerRole {
    pub fn opponent(self) -> Self {
        match self {
            Self::Host => Self::Guest,
            Self::Guest => Self::Host,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Waiting,
    Playing,
    Finished,
}

/// Why a game ended. `TimeoutHitMine` is carried for wire compatibility with
/// older clients but is never produced by the current timeout handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    HitMine,
    AllSafeRevealed,
    OpponentDisconnected,
    TimeoutNoAction,
    TimeoutHitMine,
}

impl GameOverReason {
    /// Natural ends update match stats; disconnect forfeits do not.
    pub fn is_natural(self) -> bool {
        !matches!(self, Self::OpponentDisconnected)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub host: u32,
    pub guest: u32,
}

impl Scores {
    pub fn add(&mut self, role: PlayerRole, points: u32) {
        match role {
            PlayerRole::Host => self.host += points,
            PlayerRole::Guest => self.guest += points,
        }
    }

    pub fn of(&self, role: PlayerRole) -> u32 {
        match role {
            PlayerRole::Host => self.host,
            PlayerRole::Guest => self.guest,
        }
    }
}

/// Tuning parameters for one game, snapshotted at room creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    pub grid_size: usize,
    pub mines_count: usize,
    /// Seconds per turn once the countdown has started.
    pub turn_time_limit: u32,
    pub min_reveals_to_pass: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            grid_size: 10,
            mines_count: 18,
            turn_time_limit: 30,
            min_reveals_to_pass: 1,
        }
    }
}

impl GameSettings {
    /// Clamp to playable bounds. The mine count must leave the 3×3 opening
    /// zone plus at least one more tile free.
    pub fn sanitized(mut self) -> Self {
        self.grid_size = self.grid_size.clamp(4, 32);
        let max_mines = self.grid_size * self.grid_size - 10;
        self.mines_count = self.mines_count.clamp(1, max_mines);
        self.turn_time_limit = self.turn_time_limit.clamp(1, 300);
        self.min_reveals_to_pass = self.min_reveals_to_pass.clamp(1, 10);
        self
    }
}

/// Optional per-room overrides supplied at room creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub grid_size: Option<usize>,
    pub mines_count: Option<usize>,
    pub turn_time_limit: Option<u32>,
    pub min_reveals_to_pass: Option<u32>,
}

impl SettingsPatch {
    pub fn apply_to(self, base: GameSettings) -> GameSettings {
        GameSettings {
            grid_size: self.grid_size.unwrap_or(base.grid_size),
            mines_count: self.mines_count.unwrap_or(base.mines_count),
            turn_time_limit: self.turn_time_limit.unwrap_or(base.turn_time_limit),
            min_reveals_to_pass: self.min_reveals_to_pass.unwrap_or(base.min_reveals_to_pass),
        }
        .sanitized()
    }
}

/// A tile revealed by a single `reveal_tile` call, in flood order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedTile {
    pub x: u32,
    pub z: u32,
    pub is_mine: bool,
    pub neighbor_mines: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("game is not in progress")]
    NotPlaying,
    #[error("not your turn")]
    NotYourTurn,
    #[error("coordinates ({x}, {z}) are out of bounds")]
    OutOfBounds { x: i32, z: i32 },
    #[error("tile ({x}, {z}) is already revealed")]
    AlreadyRevealed { x: i32, z: i32 },
    #[error("cannot pass: {revealed} of {required} required reveals this turn")]
    CannotPass { revealed: u32, required: u32 },
}

/// Result of an accepted reveal.
#[derive(Debug, Clone, PartialEq)]
pub enum RevealOutcome {
    Continue {
        revealed_tiles: Vec<RevealedTile>,
        can_pass: bool,
        reveals_this_turn: u32,
        scores: Scores,
        time_remaining: Option<u32>,
        /// True exactly once per game: the opening click starts the countdown.
        timer_started: bool,
    },
    MineHit {
        revealed: RevealedTile,
        winner: PlayerRole,
        loser: PlayerRole,
        scores: Scores,
        all_mines: Vec<MinePos>,
    },
    AllSafeRevealed {
        revealed_tiles: Vec<RevealedTile>,
        winner: PlayerRole,
        loser: PlayerRole,
        scores: Scores,
        all_mines: Vec<MinePos>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    pub next_player: PlayerRole,
    pub scores: Scores,
    pub time_remaining: u32,
}

/// Result of one 1 Hz timer tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not playing, or the countdown has not started yet.
    Idle,
    Tick { time_remaining: u32 },
    Timeout(TimeoutOutcome),
}

/// What the engine did when the countdown reached zero.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutOutcome {
    /// The current player had revealed at least once this turn: auto-pass.
    AutoPassed {
        player: PlayerRole,
        next_player: PlayerRole,
        scores: Scores,
        time_remaining: u32,
    },
    /// The current player took no action at all: forfeit.
    Forfeit {
        winner: PlayerRole,
        loser: PlayerRole,
        scores: Scores,
        all_mines: Vec<MinePos>,
    },
}

/// Full-state view handed to spectators joining mid-game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub grid: Vec<TileSnapshot>,
    pub grid_size: usize,
    pub mines_count: usize,
    pub current_player: PlayerRole,
    pub turn_time_limit: u32,
    pub time_remaining: Option<u32>,
    pub is_first_move: bool,
    pub scores: Scores,
}

/// Per-room game engine. Pure logic: mine layout, flood reveal, turn and
/// score accounting, countdown bookkeeping. All I/O (sockets, the 1 Hz
/// ticker task, the journal) lives in the server crate, which drives this
/// type under the room lock.
#[derive(Debug, Clone)]
pub struct GameEngine {
    settings: GameSettings,
    grid: Grid,
    status: GameStatus,
    current_player: PlayerRole,
    starting_player: PlayerRole,
    reveals_this_turn: u32,
    total_revealed: u32,
    scores: Scores,
    winner: Option<PlayerRole>,
    last_passed_by: Option<PlayerRole>,
    is_first_move: bool,
    mines_placed: bool,
    time_remaining: Option<u32>,
    rng: SmallRng,
}

impl GameEngine {
    /// Create an engine with a random mine seed and start play. Mines are not
    /// placed until the first accepted reveal, which guarantees the opening
    /// click's closed 3×3 neighborhood is safe.
    pub fn new(settings: GameSettings, starting_player: PlayerRole) -> Self {
        Self::with_seed(settings, starting_player, rand::random())
    }

    /// Deterministic variant for tests and replays.
    pub fn with_seed(settings: GameSettings, starting_player: PlayerRole, seed: u64) -> Self {
        Self {
            grid: Grid::new(settings.grid_size),
            settings,
            status: GameStatus::Playing,
            current_player: starting_player,
            starting_player,
            reveals_this_turn: 0,
            total_revealed: 0,
            scores: Scores::default(),
            winner: None,
            last_passed_by: None,
            is_first_move: true,
            mines_placed: false,
            time_remaining: None,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Build an engine over a known mine layout, skipping deferred placement.
    /// `mines_count` is taken from the layout so the win-by-reveal threshold
    /// stays consistent. First-click scoring exemption and all turn rules
    /// still apply.
    pub fn from_mine_layout(
        settings: GameSettings,
        starting_player: PlayerRole,
        mines: &[(usize, usize)],
    ) -> Self {
        let settings = GameSettings {
            mines_count: mines.len(),
            ..settings
        };
        let mut engine = Self::with_seed(settings, starting_player, 0);
        for &(x, z) in mines {
            engine.grid.tile_mut(x, z).is_mine = true;
        }
        engine.compute_neighbor_counts();
        engine.mines_placed = true;
        engine
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn current_player(&self) -> PlayerRole {
        self.current_player
    }

    pub fn starting_player(&self) -> PlayerRole {
        self.starting_player
    }

    pub fn scores(&self) -> Scores {
        self.scores
    }

    pub fn winner(&self) -> Option<PlayerRole> {
        self.winner
    }

    pub fn reveals_this_turn(&self) -> u32 {
        self.reveals_this_turn
    }

    pub fn total_revealed(&self) -> u32 {
        self.total_revealed
    }

    pub fn time_remaining(&self) -> Option<u32> {
        self.time_remaining
    }

    pub fn is_first_move(&self) -> bool {
        self.is_first_move
    }

    fn safe_tile_total(&self) -> u32 {
        (self.settings.grid_size * self.settings.grid_size - self.settings.mines_count) as u32
    }

    /// Reveal a tile for `player`. Rejections, checked in order: game not in
    /// progress, not the caller's turn, coordinates out of bounds, tile
    /// already revealed. Rejected calls leave the engine untouched.
    pub fn reveal_tile(
        &mut self,
        x: i32,
        z: i32,
        player: PlayerRole,
    ) -> Result<RevealOutcome, EngineError> {
        if self.status != GameStatus::Playing {
            return Err(EngineError::NotPlaying);
        }
        if player != self.current_player {
            return Err(EngineError::NotYourTurn);
        }
        if !self.grid.in_bounds(x, z) {
            return Err(EngineError::OutOfBounds { x, z });
        }
        let (ux, uz) = (x as usize, z as usize);
        if self.grid.tile(ux, uz).is_revealed {
            return Err(EngineError::AlreadyRevealed { x, z });
        }

        if !self.mines_placed {
            self.place_mines(ux, uz);
        }

        let first_click = self.is_first_move;
        let revealed = self.flood_reveal(ux, uz);

        self.reveals_this_turn += revealed.len() as u32;
        self.total_revealed += revealed.len() as u32;
        if !first_click {
            self.scores
                .add(player, revealed.len() as u32 * POINTS_PER_TILE);
        }

        let mut timer_started = false;
        if first_click {
            self.is_first_move = false;
            self.time_remaining = Some(self.settings.turn_time_limit);
            timer_started = true;
        }

        // A mine under the clicked tile (impossible on the opening click)
        // ends the game for the acting player.
        if self.grid.tile(ux, uz).is_mine {
            let winner = player.opponent();
            self.finish(winner);
            return Ok(RevealOutcome::MineHit {
                revealed: revealed[0],
                winner,
                loser: player,
                scores: self.scores,
                all_mines: self.grid.mines(),
            });
        }

        if self.total_revealed >= self.safe_tile_total() {
            let winner = self.last_passed_by.unwrap_or(player);
            self.finish(winner);
            return Ok(RevealOutcome::AllSafeRevealed {
                revealed_tiles: revealed,
                winner,
                loser: winner.opponent(),
                scores: self.scores,
                all_mines: self.grid.mines(),
            });
        }

        Ok(RevealOutcome::Continue {
            can_pass: self.reveals_this_turn >= self.settings.min_reveals_to_pass,
            reveals_this_turn: self.reveals_this_turn,
            revealed_tiles: revealed,
            scores: self.scores,
            time_remaining: self.time_remaining,
            timer_started,
        })
    }

    /// Hand the turn to the opponent. Requires at least
    /// `min_reveals_to_pass` reveals this turn.
    pub fn pass_turn(&mut self, player: PlayerRole) -> Result<PassOutcome, EngineError> {
        if self.status != GameStatus::Playing {
            return Err(EngineError::NotPlaying);
        }
        if player != self.current_player {
            return Err(EngineError::NotYourTurn);
        }
        if self.reveals_this_turn < self.settings.min_reveals_to_pass {
            return Err(EngineError::CannotPass {
                revealed: self.reveals_this_turn,
                required: self.settings.min_reveals_to_pass,
            });
        }

        self.last_passed_by = Some(player);
        self.current_player = player.opponent();
        self.reveals_this_turn = 0;
        self.time_remaining = Some(self.settings.turn_time_limit);

        Ok(PassOutcome {
            next_player: self.current_player,
            scores: self.scores,
            time_remaining: self.settings.turn_time_limit,
        })
    }

    /// Advance the countdown by one second. Safe against late ticker fires:
    /// no-ops once the game has finished or before the countdown starts.
    pub fn tick_second(&mut self) -> TickOutcome {
        if self.status != GameStatus::Playing {
            return TickOutcome::Idle;
        }
        let Some(remaining) = self.time_remaining else {
            return TickOutcome::Idle;
        };

        let remaining = remaining.saturating_sub(1);
        self.time_remaining = Some(remaining);
        if remaining > 0 {
            return TickOutcome::Tick {
                time_remaining: remaining,
            };
        }
        TickOutcome::Timeout(self.handle_timeout())
    }

    /// The countdown elapsed. A player who did nothing all turn forfeits;
    /// one who revealed at least once is auto-passed.
    fn handle_timeout(&mut self) -> TimeoutOutcome {
        let player = self.current_player;
        if self.reveals_this_turn == 0 {
            let winner = player.opponent();
            self.finish(winner);
            return TimeoutOutcome::Forfeit {
                winner,
                loser: player,
                scores: self.scores,
                all_mines: self.grid.mines(),
            };
        }

        self.last_passed_by = Some(player);
        self.current_player = player.opponent();
        self.reveals_this_turn = 0;
        self.time_remaining = Some(self.settings.turn_time_limit);
        TimeoutOutcome::AutoPassed {
            player,
            next_player: self.current_player,
            scores: self.scores,
            time_remaining: self.settings.turn_time_limit,
        }
    }

    /// Terminal transition: status, winner, and the countdown stop together.
    fn finish(&mut self, winner: PlayerRole) {
        self.status = GameStatus::Finished;
        self.winner = Some(winner);
        self.time_remaining = None;
    }

    /// Masked grid for the player audience: `is_mine`/`neighbor_mines` only
    /// appear on revealed tiles.
    pub fn client_grid(&self) -> Vec<TileSnapshot> {
        self.grid
            .iter()
            .map(|t| TileSnapshot {
                x: t.x,
                z: t.z,
                is_revealed: t.is_revealed,
                is_mine: t.is_revealed.then_some(t.is_mine),
                neighbor_mines: t.is_revealed.then_some(t.neighbor_mines),
            })
            .collect()
    }

    /// God view for spectators: every tile carries its mine flag and count.
    pub fn spectator_grid(&self) -> Vec<TileSnapshot> {
        self.grid
            .iter()
            .map(|t| TileSnapshot {
                x: t.x,
                z: t.z,
                is_revealed: t.is_revealed,
                is_mine: Some(t.is_mine),
                neighbor_mines: Some(t.neighbor_mines),
            })
            .collect()
    }

    pub fn all_mines(&self) -> Vec<MinePos> {
        self.grid.mines()
    }

    pub fn spectator_snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            grid: self.spectator_grid(),
            grid_size: self.settings.grid_size,
            mines_count: self.settings.mines_count,
            current_player: self.current_player,
            turn_time_limit: self.settings.turn_time_limit,
            time_remaining: self.time_remaining,
            is_first_move: self.is_first_move,
            scores: self.scores,
        }
    }

    /// Place mines once per game. The clicked tile's closed 3×3 neighborhood
    /// is excluded; a shuffle of the remaining positions replaces
    /// rejection-sampling and satisfies the same uniformity.
    fn place_mines(&mut self, safe_x: usize, safe_z: usize) {
        let size = self.settings.grid_size;
        let mut legal: Vec<(usize, usize)> = Vec::with_capacity(size * size);
        for x in 0..size {
            for z in 0..size {
                if x.abs_diff(safe_x) <= 1 && z.abs_diff(safe_z) <= 1 {
                    continue;
                }
                legal.push((x, z));
            }
        }
        legal.shuffle(&mut self.rng);
        for &(x, z) in legal.iter().take(self.settings.mines_count) {
            self.grid.tile_mut(x, z).is_mine = true;
        }
        self.compute_neighbor_counts();
        self.mines_placed = true;
    }

    fn compute_neighbor_counts(&mut self) {
        let size = self.grid.size();
        for x in 0..size {
            for z in 0..size {
                if self.grid.tile(x, z).is_mine {
                    continue;
                }
                let count = self
                    .grid
                    .neighbors(x, z)
                    .filter(|&(nx, nz)| self.grid.tile(nx, nz).is_mine)
                    .count() as u8;
                self.grid.tile_mut(x, z).neighbor_mines = count;
            }
        }
    }

    /// Reveal (x, z) and, from any zero-count safe tile, cascade into its
    /// unrevealed neighbors. Worklist instead of recursion so pathological
    /// grids cannot blow the stack. Returns the newly revealed tiles in
    /// visit order, clicked tile first.
    fn flood_reveal(&mut self, x: usize, z: usize) -> Vec<RevealedTile> {
        let mut revealed = Vec::new();
        let mut queue = VecDeque::from([(x, z)]);

        while let Some((cx, cz)) = queue.pop_front() {
            let tile = self.grid.tile_mut(cx, cz);
            if tile.is_revealed {
                continue;
            }
            tile.is_revealed = true;
            revealed.push(RevealedTile {
                x: cx as u32,
                z: cz as u32,
                is_mine: tile.is_mine,
                neighbor_mines: tile.neighbor_mines,
            });

            if !tile.is_mine && tile.neighbor_mines == 0 {
                let next: Vec<(usize, usize)> = self
                    .grid
                    .neighbors(cx, cz)
                    .filter(|&(nx, nz)| !self.grid.tile(nx, nz).is_revealed)
                    .collect();
                queue.extend(next);
            }
        }
        revealed
    }
}
