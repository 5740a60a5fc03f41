use std::{io, path::PathBuf};

use teloxide::RequestError;
use thiserror::Error;

/// Errors produced by the signal relay
#[derive(Debug, Error)]
pub enum BotError {
    #[error("BOT_TOKEN is required to start the bot")]
    MissingToken,

    #[error("failed to read state file {path}: {source}")]
    StateRead { path: PathBuf, source: io::Error },

    #[error("failed to persist state to {path}: {source}")]
    StatePersist { path: PathBuf, source: io::Error },

    #[error("failed to encode state: {0}")]
    StateEncode(#[from] serde_json::Error),

    #[error("Telegram error: {0}")]
    Telegram(#[from] RequestError),
}

impl BotError {
    /// Short text shown to the Telegram user when a request fails.
    pub fn user_message(&self) -> &'static str {
        match self {
            BotError::StateRead { .. } | BotError::StatePersist { .. } | BotError::StateEncode(_) => {
                "Не удалось сохранить изменения. Попробуйте ещё раз."
            }
            BotError::MissingToken | BotError::Telegram(_) => {
                "Не удалось выполнить команду. Попробуйте ещё раз."
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
