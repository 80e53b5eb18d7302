//! LobbyManager: owns the set of active lobbies and routes players
//! into them.
//!
//! Grounded on the teacher's `MatchmakingService`/`MatchmakingQueue` —
//! kept the `DashMap` registry, the per-player routing-task shape, and
//! the periodic `run()` sweep loop, generalized from one shared FFA
//! queue into many independently addressable lobbies, each owning its
//! own `MatchSimulation` tick loop (teacher's `GameMatch::run`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::game::controller::MAX_PLAYERS;
use crate::game::simulation::MatchSimulation;
use crate::util::time::{unix_millis, SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{ClientMsg, Loadout, LobbyListEntry, LobbyStatus, MatchMode, ServerMsg};

/// Idle lobbies (zero players, no activity) are torn down after this long.
const IDLE_LOBBY_TIMEOUT_MS: u64 = 60_000;
/// Lobbies in `Finished` sit for this long before the sweep removes them,
/// giving `MatchController`'s own reset-to-waiting transition first crack.
const FINISHED_LOBBY_GRACE_MS: u64 = 15_000;

/// A command routed from a connected socket into its lobby's tick loop.
pub enum LobbyCommand {
    Join { player_id: Uuid, loadout: Loadout },
    Leave { player_id: Uuid },
    ClientMessage { player_id: Uuid, msg: ClientMsg },
}

/// Errors returned by lobby lifecycle operations, mapped to the typed
/// `*_failed` server messages at the call site.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("lobby_not_found")]
    NotFound,
    #[error("wrong_password")]
    WrongPassword,
    #[error("lobby_full")]
    Full,
    #[error("server_at_capacity")]
    ServerAtCapacity,
}

/// Handle to a running lobby task, held by `LobbyManager`.
#[derive(Clone)]
pub struct LobbyHandle {
    pub id: Uuid,
    pub mode: MatchMode,
    pub is_private: bool,
    password_hash: Option<String>,
    pub command_tx: mpsc::Sender<LobbyCommand>,
    /// Broadcasts `(recipient, message)` pairs; every connection task
    /// filters for its own id. A message never goes to a socket outside
    /// the lobby that produced it because it is never sent on any other
    /// lobby's channel.
    pub event_tx: broadcast::Sender<(Uuid, ServerMsg)>,
    player_count: Arc<AtomicUsize>,
    status: Arc<std::sync::Mutex<LobbyStatus>>,
    capacity: u32,
    created_at_ms: u64,
}

impl LobbyHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> LobbyStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn check_password(&self, password: Option<&str>) -> bool {
        match &self.password_hash {
            None => true,
            Some(hash) => password.map(hash_password).as_deref() == Some(hash.as_str()),
        }
    }
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"arena-lobby-salt:");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct CreateLobbyOptions {
    pub mode: MatchMode,
    pub max_players: Option<u32>,
    pub password: Option<String>,
}

/// Owns every active lobby on this process. Each lobby is an isolated
/// cooperative task: no state is ever shared across two lobbies, and no
/// message from one lobby's tick loop is ever broadcast on another's
/// channel.
pub struct LobbyManager {
    lobbies: DashMap<Uuid, LobbyHandle>,
    max_lobbies: usize,
    default_capacity: u32,
}

impl LobbyManager {
    pub fn new(config: &Config) -> Self {
        Self {
            lobbies: DashMap::new(),
            max_lobbies: config.max_lobbies,
            default_capacity: config.default_lobby_capacity,
        }
    }

    pub fn active_lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn total_players(&self) -> usize {
        self.lobbies.iter().map(|l| l.player_count()).sum()
    }

    /// `find_match`: first public lobby with room in this mode that
    /// isn't finished, else a freshly created waiting lobby.
    pub fn quick_match(&self, mode: MatchMode) -> Result<Uuid, LobbyError> {
        for entry in self.lobbies.iter() {
            let handle = entry.value();
            if handle.mode == mode
                && !handle.is_private
                && handle.player_count() < handle.capacity as usize
                && matches!(handle.status(), LobbyStatus::Waiting | LobbyStatus::Playing)
            {
                return Ok(handle.id);
            }
        }
        self.create_lobby(CreateLobbyOptions { mode, max_players: None, password: None }, false)
    }

    pub fn create_private(&self, options: CreateLobbyOptions) -> Result<Uuid, LobbyError> {
        self.create_lobby(options, true)
    }

    fn create_lobby(&self, options: CreateLobbyOptions, is_private: bool) -> Result<Uuid, LobbyError> {
        if self.lobbies.len() >= self.max_lobbies {
            return Err(LobbyError::ServerAtCapacity);
        }

        let lobby_id = Uuid::new_v4();
        let capacity = options
            .max_players
            .unwrap_or(self.default_capacity)
            .min(MAX_PLAYERS as u32);
        let password_hash = options.password.as_deref().map(hash_password);
        let seed = rand::random::<u64>();

        let (command_tx, command_rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));
        let status = Arc::new(std::sync::Mutex::new(LobbyStatus::Waiting));

        let handle = LobbyHandle {
            id: lobby_id,
            mode: options.mode,
            is_private,
            password_hash,
            command_tx,
            event_tx: event_tx.clone(),
            player_count: player_count.clone(),
            status: status.clone(),
            capacity,
            created_at_ms: unix_millis(),
        };
        self.lobbies.insert(lobby_id, handle);

        let simulation = MatchSimulation::new(lobby_id, options.mode, seed);
        tokio::spawn(run_lobby(simulation, command_rx, event_tx, player_count, status));

        info!(lobby_id = %lobby_id, mode = ?options.mode, is_private, "Created lobby");
        Ok(lobby_id)
    }

    /// `Join`: validates password/capacity, returns whether this is a
    /// late join into an already-running match.
    pub fn join(&self, lobby_id: Uuid, password: Option<&str>) -> Result<(LobbyHandle, bool), LobbyError> {
        let handle = self.lobbies.get(&lobby_id).map(|e| e.value().clone()).ok_or(LobbyError::NotFound)?;
        if !handle.check_password(password) {
            return Err(LobbyError::WrongPassword);
        }
        if handle.player_count() >= handle.capacity as usize {
            return Err(LobbyError::Full);
        }
        let is_late_join = handle.status() == LobbyStatus::Playing;
        Ok((handle, is_late_join))
    }

    pub fn get(&self, lobby_id: Uuid) -> Option<LobbyHandle> {
        self.lobbies.get(&lobby_id).map(|e| e.value().clone())
    }

    /// `List`: public listing, filtered by the requester's preferences.
    /// Private lobbies are omitted unless `show_private` is set.
    pub fn list(
        &self,
        show_private: bool,
        show_full: bool,
        show_in_progress: bool,
        mode: Option<MatchMode>,
    ) -> Vec<LobbyListEntry> {
        self.lobbies
            .iter()
            .filter(|entry| show_private || !entry.is_private)
            .filter(|entry| show_full || entry.player_count() < entry.capacity as usize)
            .filter(|entry| show_in_progress || entry.status() != LobbyStatus::Playing)
            .filter(|entry| mode.map_or(true, |m| entry.mode == m))
            .map(|entry| LobbyListEntry {
                id: entry.id,
                player_count: entry.player_count() as u32,
                max_players: entry.capacity,
                mode: entry.mode,
                status: entry.status(),
                is_private: entry.is_private,
                password_required: entry.password_hash.is_some(),
            })
            .collect()
    }

    /// Periodic sweep: destroys idle-and-empty lobbies and lobbies that
    /// have sat finished past their grace period.
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            let now = unix_millis();
            let mut to_remove = Vec::new();
            for entry in self.lobbies.iter() {
                let handle = entry.value();
                let empty = handle.player_count() == 0;
                let idle_timeout = empty && now.saturating_sub(handle.created_at_ms) > IDLE_LOBBY_TIMEOUT_MS;
                let finished_timeout = handle.status() == LobbyStatus::Finished
                    && now.saturating_sub(handle.created_at_ms) > FINISHED_LOBBY_GRACE_MS
                    && empty;
                if idle_timeout || finished_timeout {
                    to_remove.push(handle.id);
                }
            }
            for lobby_id in to_remove {
                self.lobbies.remove(&lobby_id);
                warn!(lobby_id = %lobby_id, "Swept idle lobby");
            }
        }
    }
}

/// The per-lobby authoritative tick loop: physics at `SIMULATION_TPS`,
/// a network tick every `SIMULATION_TPS / SNAPSHOT_TPS` physics ticks.
/// Mirrors the teacher's `GameMatch::run` shape.
async fn run_lobby(
    mut simulation: MatchSimulation,
    mut command_rx: mpsc::Receiver<LobbyCommand>,
    event_tx: broadcast::Sender<(Uuid, ServerMsg)>,
    player_count: Arc<AtomicUsize>,
    status: Arc<std::sync::Mutex<LobbyStatus>>,
) {
    let lobby_id = simulation.lobby_id;
    info!(lobby_id = %lobby_id, "Lobby started");

    let tick_duration = Duration::from_micros(1_000_000 / SIMULATION_TPS as u64);
    let mut tick_interval = interval(tick_duration);
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let ticks_per_network_tick = (SIMULATION_TPS / SNAPSHOT_TPS).max(1);
    let mut snapshot_builder = crate::game::snapshot::SnapshotBuilder::new(ticks_per_network_tick);

    loop {
        tick_interval.tick().await;
        let now_ms = unix_millis();

        while let Ok(command) = command_rx.try_recv() {
            let events = match command {
                LobbyCommand::Join { player_id, loadout } => {
                    simulation.handle_player_join(player_id, loadout, now_ms)
                }
                LobbyCommand::Leave { player_id } => simulation.remove_player(player_id, now_ms),
                LobbyCommand::ClientMessage { player_id, msg } => {
                    simulation.handle_client_msg(player_id, msg, now_ms)
                }
            };
            for event in events {
                broadcast_to_lobby(&event_tx, lobby_id, None, event);
            }
        }

        let tick_events = simulation.run_physics_tick(now_ms);
        for event in tick_events {
            broadcast_to_lobby(&event_tx, lobby_id, None, event);
        }

        player_count.store(simulation.player_count(), Ordering::Relaxed);
        *status.lock().expect("status lock poisoned") = simulation.controller.status();

        if snapshot_builder.should_send() {
            for (recipient, snapshot) in simulation.build_snapshots(now_ms) {
                broadcast_to_lobby(&event_tx, lobby_id, Some(recipient), snapshot);
            }
        }

        for idle_id in simulation.idle_players(now_ms) {
            for event in simulation.remove_player(idle_id, now_ms) {
                broadcast_to_lobby(&event_tx, lobby_id, None, event);
            }
        }

        if event_tx.receiver_count() == 0 && simulation.player_count() == 0 {
            // No one listening and no one playing; let the sweep reap us.
        }
    }
}

/// Sends one event to every socket subscribed to this lobby. `recipient
/// == None` means "broadcast to everyone in this lobby" (match
/// lifecycle events); `Some(id)` scopes a filtered snapshot to one
/// player. Never touches any other lobby's channel — this is what makes
/// cross-lobby leakage structurally unrepresentable.
fn broadcast_to_lobby(
    event_tx: &broadcast::Sender<(Uuid, ServerMsg)>,
    _lobby_id: Uuid,
    recipient: Option<Uuid>,
    msg: ServerMsg,
) {
    let target = recipient.unwrap_or(Uuid::nil());
    let _ = event_tx.send((target, msg));
}
