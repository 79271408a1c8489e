use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use mineduel_core::engine::{GameOverReason, GameSettings, PlayerRole, Scores};
use mineduel_core::net::messages::DanmakuBroadcast;
use mineduel_core::room::Room;
use mineduel_core::time;

/// On-disk shape of a room journal: `{data_dir}/rooms/{CODE}.json` while the
/// room lives, moved under `{data_dir}/archive/` when it closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJournal {
    pub room_code: String,
    pub created_at: i64,
    pub host_name: String,
    pub guest_name: Option<String>,
    pub settings: GameSettings,
    pub messages: Vec<DanmakuBroadcast>,
    pub games: Vec<GameRecord>,
    pub events: Vec<EventRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub starting_player: PlayerRole,
    pub settings: GameSettings,
    pub moves: Vec<MoveRecord>,
    pub result: Option<GameResultRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    pub at: i64,
    pub player: PlayerRole,
    #[serde(flatten)]
    pub action: MoveAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MoveAction {
    Reveal {
        x: i32,
        z: i32,
        revealed: usize,
        hit_mine: bool,
    },
    Pass,
    TimeoutAutoPass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResultRecord {
    pub winner: PlayerRole,
    pub loser: PlayerRole,
    pub reason: GameOverReason,
    pub scores: Scores,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub at: i64,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Commands accepted by a room's journal actor.
pub enum JournalCmd {
    GuestJoined(String),
    Chat(DanmakuBroadcast),
    GameStarted {
        at: i64,
        starting_player: PlayerRole,
        settings: GameSettings,
    },
    Move(MoveRecord),
    GameEnded {
        at: i64,
        result: GameResultRecord,
    },
    Event(EventRecord),
    /// Wait until every prior command has been applied and persisted.
    Flush(oneshot::Sender<()>),
    /// Stamp `closed_at`, persist, and move the file to the archive.
    Archive,
}

/// Handle to all per-room journal actors. Each room gets one task whose
/// inbox is drained in order, so concurrent callers are serialised in
/// arrival order; the actor (and its table entry) ends when the room
/// archives. Disk failures are logged and never reach gameplay.
#[derive(Clone)]
pub struct JournalHandle {
    senders: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<JournalCmd>>>>,
    rooms_dir: PathBuf,
    archive_dir: PathBuf,
}

impl JournalHandle {
    pub fn new(data_dir: &Path) -> Self {
        let rooms_dir = data_dir.join("rooms");
        let archive_dir = data_dir.join("archive");
        for dir in [&rooms_dir, &archive_dir] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::error!(dir = %dir.display(), error = %e, "Failed to create journal dir");
            }
        }
        Self {
            senders: Arc::new(Mutex::new(HashMap::new())),
            rooms_dir,
            archive_dir,
        }
    }

    /// Spawn the journal actor for a freshly created room.
    pub fn open_room(&self, room: &Room) {
        let doc = RoomJournal {
            room_code: room.code.clone(),
            created_at: room.created_at,
            host_name: room.host.name.clone(),
            guest_name: None,
            settings: room.settings,
            messages: Vec::new(),
            games: Vec::new(),
            events: Vec::new(),
            closed_at: None,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let path = self.rooms_dir.join(format!("{}.json", room.code));
        let archive_dir = self.archive_dir.clone();
        tokio::spawn(run_journal_actor(doc, path, archive_dir, rx));

        if let Ok(mut senders) = self.senders.lock() {
            senders.insert(room.code.clone(), tx);
        }
    }

    /// Enqueue a command for a room. Commands for unknown rooms are dropped.
    pub fn send(&self, code: &str, cmd: JournalCmd) {
        let Ok(senders) = self.senders.lock() else {
            return;
        };
        if let Some(tx) = senders.get(code)
            && tx.send(cmd).is_err()
        {
            tracing::warn!(room = code, "Journal actor gone, dropping record");
        }
    }

    /// Close a room's journal and forget its actor.
    pub fn archive(&self, code: &str) {
        let Ok(mut senders) = self.senders.lock() else {
            return;
        };
        if let Some(tx) = senders.remove(code)
            && tx.send(JournalCmd::Archive).is_err()
        {
            tracing::warn!(room = code, "Journal actor gone before archive");
        }
    }

    /// Await persistence of everything enqueued so far.
    pub async fn flush(&self, code: &str) {
        let (tx, rx) = oneshot::channel();
        self.send(code, JournalCmd::Flush(tx));
        let _ = rx.await;
    }

    /// Archive any active-directory file whose room no longer exists.
    pub async fn orphan_sweep(&self, active_codes: &HashSet<String>) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.rooms_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json")
                || active_codes.contains(stem)
            {
                continue;
            }
            let target = self
                .archive_dir
                .join(format!("{stem}_{}.json", time::archive_stamp()));
            match tokio::fs::rename(&path, &target).await {
                Ok(()) => tracing::info!(room = stem, "Archived orphaned journal"),
                Err(e) => tracing::warn!(
                    room = stem, error = %e,
                    "Failed to archive orphaned journal"
                ),
            }
        }
    }
}

async fn run_journal_actor(
    mut doc: RoomJournal,
    path: PathBuf,
    archive_dir: PathBuf,
    mut rx: mpsc::UnboundedReceiver<JournalCmd>,
) {
    persist(&doc, &path).await;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCmd::GuestJoined(name) => {
                doc.guest_name = Some(name);
            },
            JournalCmd::Chat(record) => {
                doc.messages.push(record);
            },
            JournalCmd::GameStarted {
                at,
                starting_player,
                settings,
            } => {
                doc.games.push(GameRecord {
                    started_at: at,
                    ended_at: None,
                    starting_player,
                    settings,
                    moves: Vec::new(),
                    result: None,
                });
            },
            JournalCmd::Move(record) => {
                if let Some(game) = doc.games.last_mut() {
                    game.moves.push(record);
                }
            },
            JournalCmd::GameEnded { at, result } => {
                if let Some(game) = doc.games.last_mut() {
                    game.ended_at = Some(at);
                    game.result = Some(result);
                }
            },
            JournalCmd::Event(record) => {
                doc.events.push(record);
            },
            JournalCmd::Flush(ack) => {
                let _ = ack.send(());
                continue;
            },
            JournalCmd::Archive => {
                doc.closed_at = Some(time::now_millis());
                doc.events.push(EventRecord {
                    at: time::now_millis(),
                    event: "room_closed".to_string(),
                    detail: None,
                });
                persist(&doc, &path).await;

                let target = archive_dir.join(format!(
                    "{}_{}.json",
                    doc.room_code,
                    time::archive_stamp()
                ));
                if let Err(e) = tokio::fs::rename(&path, &target).await {
                    tracing::error!(
                        room = %doc.room_code, error = %e,
                        "Failed to archive journal"
                    );
                }
                return;
            },
        }
        persist(&doc, &path).await;
    }
}

async fn persist(doc: &RoomJournal, path: &Path) {
    match serde_json::to_vec_pretty(doc) {
        Ok(bytes) => {
            if let Err(e) = tokio::fs::write(path, bytes).await {
                tracing::error!(room = %doc.room_code, error = %e, "Journal write failed");
            }
        },
        Err(e) => {
            tracing::error!(room = %doc.room_code, error = %e, "Journal serialize failed");
        },
    }
}
