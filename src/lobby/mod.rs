//! Lobby lifecycle: matchmaking, private lobbies, and the per-lobby
//! authoritative tick loop.

pub mod manager;

pub use manager::{CreateLobbyOptions, LobbyCommand, LobbyError, LobbyHandle, LobbyManager};
