//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::SessionSettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated
    pub client_origin: String,
    /// Gameplay defaults applied to every new session
    pub session_settings: SessionSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string())
        };

        let defaults = SessionSettings::default();
        let session_settings = SessionSettings {
            cube_spawn_delay_min: millis_var(
                "CUBE_SPAWN_DELAY_MIN_MS",
                defaults.cube_spawn_delay_min,
            )?,
            cube_spawn_delay_max: millis_var(
                "CUBE_SPAWN_DELAY_MAX_MS",
                defaults.cube_spawn_delay_max,
            )?,
            cube_stay_duration: millis_var("CUBE_STAY_DURATION_MS", defaults.cube_stay_duration)?,
            min_players: parse_var("MIN_PLAYERS", defaults.min_players)?,
            max_players: parse_var("MAX_PLAYERS", defaults.max_players)?,
            red_probability: defaults.red_probability,
            empty_grace: secs_var("EMPTY_SESSION_GRACE_SECS", defaults.empty_grace)?,
        };

        if session_settings.min_players == 0
            || session_settings.min_players > session_settings.max_players
        {
            return Err(ConfigError::Invalid(
                "MIN_PLAYERS must be between 1 and MAX_PLAYERS",
            ));
        }
        if session_settings.cube_spawn_delay_max < session_settings.cube_spawn_delay_min {
            return Err(ConfigError::Invalid(
                "CUBE_SPAWN_DELAY_MAX_MS must not be below CUBE_SPAWN_DELAY_MIN_MS",
            ));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            session_settings,
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Unparseable(key)),
        Err(_) => Ok(default),
    }
}

fn millis_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_var(
        key,
        default.as_millis() as u64,
    )?))
}

fn secs_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_var(key, default.as_secs())?))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Could not parse environment variable: {0}")]
    Unparseable(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
