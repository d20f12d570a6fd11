//! Application-level configuration loading: session timings and store settings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{dao::session::DEFAULT_COLLECTION, services::synchronizer::SyncSettings};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "RACE_ROOM_CONFIG_PATH";

const DEFAULT_GAME_DURATION_SECS: u64 = 30;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_MIN_PLAYERS: usize = 2;
const DEFAULT_QUESTION_SET_ID: &str = "javascript-basics";
const DEFAULT_TRANSACTION_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Length of a round once started.
    pub game_duration: Duration,
    /// Period of the local countdown tick.
    pub tick_interval: Duration,
    /// Players required before the host may start.
    pub min_players: usize,
    /// Question set used when a create request does not name one.
    pub default_question_set_id: String,
    /// Document collection holding sessions.
    pub collection: String,
    /// Attempt budget of store transactions.
    pub transaction_max_attempts: u32,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        game_duration_secs = app_config.game_duration.as_secs(),
                        collection = %app_config.collection,
                        "loaded session settings from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent keys keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Timings handed to the session synchronizer.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            game_duration: self.game_duration,
            tick_interval: self.tick_interval,
            min_players: self.min_players,
            ..SyncSettings::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    game_duration_secs: u64,
    tick_interval_ms: u64,
    min_players: usize,
    default_question_set_id: String,
    collection: String,
    transaction_max_attempts: u32,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            game_duration_secs: DEFAULT_GAME_DURATION_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            min_players: DEFAULT_MIN_PLAYERS,
            default_question_set_id: DEFAULT_QUESTION_SET_ID.into(),
            collection: DEFAULT_COLLECTION.into(),
            transaction_max_attempts: DEFAULT_TRANSACTION_MAX_ATTEMPTS,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            game_duration: Duration::from_secs(value.game_duration_secs),
            // a zero period would make the ticker panic
            tick_interval: Duration::from_millis(value.tick_interval_ms.max(1)),
            min_players: value.min_players.max(1),
            default_question_set_id: value.default_question_set_id,
            collection: value.collection,
            transaction_max_attempts: value.transaction_max_attempts.max(1),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_a_thirty_second_round() {
        let config = AppConfig::default();
        assert_eq!(config.game_duration, Duration::from_secs(30));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.min_players, 2);
        assert_eq!(config.default_question_set_id, "javascript-basics");
        assert_eq!(config.collection, "GameRooms-CareerRacer");
    }

    #[test]
    fn partial_documents_keep_remaining_defaults() {
        let config = AppConfig::from_json(r#"{"gameDurationSecs": 5, "minPlayers": 3}"#).unwrap();
        assert_eq!(config.game_duration, Duration::from_secs(5));
        assert_eq!(config.min_players, 3);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.transaction_max_attempts, 5);
    }

    #[test]
    fn zero_tick_interval_is_raised() {
        let config = AppConfig::from_json(r#"{"tickIntervalMs": 0}"#).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(1));
    }
}
