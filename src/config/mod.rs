//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS
    pub client_origin: String,

    /// Default and max lobby player capacity
    pub default_lobby_capacity: u32,
    /// Minimum players required to begin the starting countdown
    pub min_players_to_start: usize,
    /// Kills a team needs to win a match
    pub default_kill_target: u32,
    /// Maximum number of concurrently active lobbies per process
    pub max_lobbies: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            default_lobby_capacity: env::var("DEFAULT_LOBBY_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            min_players_to_start: env::var("MIN_PLAYERS_TO_START")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            default_kill_target: env::var("DEFAULT_KILL_TARGET")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            max_lobbies: env::var("MAX_LOBBIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
