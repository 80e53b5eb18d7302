//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::lobby::{CreateLobbyOptions, LobbyCommand, LobbyHandle};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler. Unlike the teacher's build, there is no
/// account system to authenticate against: each connection is minted a
/// fresh identity at upgrade time, matching the spec's explicit
/// non-goal of account identity.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let player_id = Uuid::new_v4();
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, state))
}

/// Tracks the lobby a connection is currently joined to, along with the
/// task forwarding that lobby's broadcasts to this connection's
/// outbound queue.
struct CurrentLobby {
    handle: LobbyHandle,
    forwarder: JoinHandle<()>,
}

async fn handle_socket(socket: WebSocket, player_id: Uuid, state: AppState) {
    info!(player_id = %player_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMsg>(128);

    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let rate_limiter = PlayerRateLimiter::new();
    let mut current_lobby: Option<CurrentLobby> = None;

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        handle_client_msg(player_id, msg, &state, &mut current_lobby, &outbound_tx).await;
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    if let Some(lobby) = current_lobby.take() {
        let _ = lobby.handle.command_tx.send(LobbyCommand::Leave { player_id }).await;
        lobby.forwarder.abort();
    }
    writer_handle.abort();

    info!(player_id = %player_id, "WebSocket connection closed");
}

async fn handle_client_msg(
    player_id: Uuid,
    msg: ClientMsg,
    state: &AppState,
    current_lobby: &mut Option<CurrentLobby>,
    outbound_tx: &mpsc::Sender<ServerMsg>,
) {
    match msg {
        ClientMsg::FindMatch { mode } => {
            if current_lobby.is_some() {
                let _ = outbound_tx
                    .send(ServerMsg::MatchmakingFailed { reason: "already_in_lobby".to_string() })
                    .await;
                return;
            }
            match state.lobby_manager.quick_match(mode) {
                Ok(lobby_id) => join_lobby(player_id, lobby_id, None, state, current_lobby, outbound_tx).await,
                Err(e) => {
                    let _ = outbound_tx
                        .send(ServerMsg::MatchmakingFailed { reason: e.to_string() })
                        .await;
                }
            }
        }
        ClientMsg::CreatePrivateLobby { mode, max_players, password } => {
            if current_lobby.is_some() {
                let _ = outbound_tx
                    .send(ServerMsg::LobbyCreationFailed { reason: "already_in_lobby".to_string() })
                    .await;
                return;
            }
            match state.lobby_manager.create_private(CreateLobbyOptions { mode, max_players, password: password.clone() }) {
                Ok(lobby_id) => join_lobby(player_id, lobby_id, password, state, current_lobby, outbound_tx).await,
                Err(e) => {
                    let _ = outbound_tx
                        .send(ServerMsg::LobbyCreationFailed { reason: e.to_string() })
                        .await;
                }
            }
        }
        ClientMsg::JoinLobby { lobby_id, password } => {
            if current_lobby.is_some() {
                let _ = outbound_tx
                    .send(ServerMsg::LobbyJoinFailed { reason: "already_in_lobby".to_string() })
                    .await;
                return;
            }
            join_lobby(player_id, lobby_id, password, state, current_lobby, outbound_tx).await;
        }
        ClientMsg::GetLobbyList { show_private, show_full, show_in_progress, mode } => {
            let lobbies = state.lobby_manager.list(show_private, show_full, show_in_progress, mode);
            let total_count = lobbies.len() as u32;
            let _ = outbound_tx.send(ServerMsg::LobbyList { lobbies, total_count }).await;
        }
        ClientMsg::LeaveLobby => {
            if let Some(lobby) = current_lobby.take() {
                let _ = lobby.handle.command_tx.send(LobbyCommand::Leave { player_id }).await;
                lobby.forwarder.abort();
            }
        }
        ClientMsg::PlayerJoin { loadout } => {
            if let Some(lobby) = current_lobby.as_ref() {
                let _ = lobby
                    .handle
                    .command_tx
                    .send(LobbyCommand::Join { player_id, loadout })
                    .await;
            }
        }
        other => {
            if let Some(lobby) = current_lobby.as_ref() {
                let _ = lobby
                    .handle
                    .command_tx
                    .send(LobbyCommand::ClientMessage { player_id, msg: other })
                    .await;
            }
        }
    }
}

/// Joins `player_id` into `lobby_id`. Callers must have already checked
/// `current_lobby` is empty — a quick-match/create/join request from a
/// player already in a lobby is rejected before this is ever called.
async fn join_lobby(
    player_id: Uuid,
    lobby_id: Uuid,
    password: Option<String>,
    state: &AppState,
    current_lobby: &mut Option<CurrentLobby>,
    outbound_tx: &mpsc::Sender<ServerMsg>,
) {
    match state.lobby_manager.join(lobby_id, password.as_deref()) {
        Ok((handle, is_in_progress)) => {
            let forwarder = spawn_forwarder(player_id, handle.event_tx.subscribe(), outbound_tx.clone());
            let _ = outbound_tx
                .send(ServerMsg::LobbyJoined {
                    lobby_id,
                    player_count: handle.player_count() as u32,
                    max_players: handle.capacity(),
                    mode: handle.mode,
                    status: handle.status(),
                    is_in_progress,
                })
                .await;
            *current_lobby = Some(CurrentLobby { handle, forwarder });
        }
        Err(e) => {
            let _ = outbound_tx
                .send(ServerMsg::LobbyJoinFailed { reason: e.to_string() })
                .await;
        }
    }
}

/// Forwards `(recipient, message)` pairs from a lobby's broadcast
/// channel to this connection's outbound queue. A nil recipient means
/// "every socket in this lobby"; otherwise only this player's own
/// messages pass through. This is what keeps one lobby's traffic from
/// ever reaching a socket joined to a different lobby.
fn spawn_forwarder(
    player_id: Uuid,
    mut event_rx: broadcast::Receiver<(Uuid, ServerMsg)>,
    outbound_tx: mpsc::Sender<ServerMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok((recipient, msg)) => {
                    if recipient == Uuid::nil() || recipient == player_id {
                        if outbound_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(player_id = %player_id, lagged = n, "Lobby broadcast receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
