use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PREFIX: &str = "!";
const DEFAULT_STORE_PATH: &str = "plex_music.json";
const DEFAULT_MAX_QUEUE: usize = 500;
const DEFAULT_IDLE_POLL_MS: u64 = 1000;
const DEFAULT_CLIENT_IDENTIFIER: &str = "plex-music-bot";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Expected {0} in the environment")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: String,
    pub prefix: String,
    pub store_path: PathBuf,
    /// `None` means the queue is unbounded.
    pub max_queue: Option<usize>,
    pub idle_poll: Duration,
    pub client_identifier: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.is_empty())
            .ok_or(SettingsError::Missing("DISCORD_TOKEN"))?;

        let max_queue = match parse(&lookup, "PLEX_MUSIC_MAX_QUEUE")? {
            Some(0) => None,
            Some(limit) => Some(limit as usize),
            None => Some(DEFAULT_MAX_QUEUE),
        };

        let idle_poll = parse(&lookup, "PLEX_MUSIC_IDLE_POLL_MS")?
            .filter(|millis| *millis > 0)
            .unwrap_or(DEFAULT_IDLE_POLL_MS);

        Ok(Self {
            discord_token,
            prefix: lookup("PLEX_MUSIC_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            store_path: lookup("PLEX_MUSIC_STORE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            max_queue,
            idle_poll: Duration::from_millis(idle_poll),
            client_identifier: lookup("PLEX_CLIENT_IDENTIFIER")
                .unwrap_or_else(|| DEFAULT_CLIENT_IDENTIFIER.to_string()),
        })
    }
}

fn parse(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, SettingsError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| SettingsError::Invalid { name, value })
        })
        .transpose()
}
