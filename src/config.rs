use std::path::PathBuf;

use crate::error::{BotError, Result};

pub const DEFAULT_STATE_PATH: &str = "data/state.json";

/// Runtime configuration read from `BOT_*` environment variables
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: Option<String>,
    pub admin_ids: Vec<u64>,
    pub state_path: PathBuf,
    pub master_id: Option<u64>,
}

impl BotConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Malformed admin or master ids are logged and dropped; they never make
    /// loading fail. A missing token is only reported by [`BotConfig::token`].
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("BOT_TOKEN").filter(|t| !t.trim().is_empty());
        let admin_ids = parse_ids(&lookup("BOT_ADMIN_IDS").unwrap_or_default());
        let state_path = lookup("BOT_STATE_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));
        let master_id = parse_master(lookup("BOT_MASTER_ID").as_deref());

        Self {
            token,
            admin_ids,
            state_path,
            master_id,
        }
    }

    /// Returns the bot token or [`BotError::MissingToken`].
    pub fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or(BotError::MissingToken)
    }

    /// True when no master account is configured and anyone may trade.
    pub fn is_open_mode(&self) -> bool {
        self.master_id.is_none()
    }
}

/// Parses a comma-separated list of user ids, skipping invalid entries.
pub fn parse_ids(value: &str) -> Vec<u64> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!("Ignoring admin id '{part}' because it is not an integer");
                None
            }
        })
        .collect()
}

fn parse_master(value: Option<&str>) -> Option<u64> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<u64>() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!("BOT_MASTER_ID must be an integer, ignoring '{trimmed}'");
            None
        }
    }
}
