//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::lobby::LobbyManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lobby_manager: Arc<LobbyManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let lobby_manager = Arc::new(LobbyManager::new(&config));

        Self { config, lobby_manager }
    }
}
