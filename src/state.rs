use std::{
    collections::BTreeSet,
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use teloxide::types::{ChatId, UserId};
use tokio::sync::Mutex;

use crate::error::{BotError, Result};

/// Currently open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Closed,
    Long,
    Short,
}

/// Direction of a newly opened position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    fn position(self) -> Position {
        match self {
            Direction::Long => Position::Long,
            Direction::Short => Position::Short,
        }
    }

    fn action_tag(self) -> &'static str {
        match self {
            Direction::Long => "open_long",
            Direction::Short => "open_short",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Position::Closed => "closed",
            Position::Long => "long",
            Position::Short => "short",
        };
        f.write_str(label)
    }
}

/// The single persisted signal record.
///
/// Every field has a default so files written by older or newer versions
/// still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionState {
    pub status: Position,
    pub stop_loss: Option<f64>,
    pub updated_by: Option<u64>,
    pub last_action: String,
    pub chat_ids: BTreeSet<i64>,
}

impl Default for PositionState {
    fn default() -> Self {
        Self::with_action("initial")
    }
}

impl PositionState {
    fn with_action(tag: &str) -> Self {
        Self {
            status: Position::Closed,
            stop_loss: None,
            updated_by: None,
            last_action: tag.to_string(),
            chat_ids: BTreeSet::new(),
        }
    }

    pub fn updated_by(&self) -> Option<UserId> {
        self.updated_by.map(UserId)
    }
}

/// Owns the position record and writes it through to disk on every change.
///
/// All mutations run under one lock, covering both the in-memory update
/// and the file write.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<PositionState>,
}

impl StateStore {
    /// Loads the store from `path`, falling back to a default record when the
    /// file is missing or cannot be parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| BotError::StatePersist {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<PositionState>(&bytes) {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!(
                        "State file {} was invalid ({err}). Resetting state.",
                        path.display()
                    );
                    PositionState::with_action("reset")
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => PositionState::default(),
            Err(source) => return Err(BotError::StateRead { path, source }),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current record.
    pub async fn read(&self) -> PositionState {
        self.state.lock().await.clone()
    }

    pub async fn open_position(&self, direction: Direction, actor: UserId) -> Result<PositionState> {
        self.mutate(|state| {
            state.status = direction.position();
            state.updated_by = Some(actor.0);
            state.last_action = direction.action_tag().to_string();
        })
        .await
    }

    pub async fn close_position(&self, actor: UserId) -> Result<PositionState> {
        self.mutate(|state| {
            state.status = Position::Closed;
            state.updated_by = Some(actor.0);
            state.last_action = "close".to_string();
        })
        .await
    }

    /// Sets the stop-loss, or clears it when `value` is `None`.
    pub async fn update_stop_loss(&self, value: Option<f64>, actor: UserId) -> Result<PositionState> {
        self.mutate(|state| {
            state.stop_loss = value;
            state.updated_by = Some(actor.0);
            state.last_action = match value {
                Some(_) => "stop_loss",
                None => "clear_stop_loss",
            }
            .to_string();
        })
        .await
    }

    /// Adds a chat to the broadcast list. Returns `true` if it was new; the
    /// file is only rewritten in that case.
    pub async fn register_chat(&self, chat_id: ChatId) -> Result<bool> {
        let mut guard = self.state.lock().await;
        if guard.chat_ids.contains(&chat_id.0) {
            return Ok(false);
        }

        let mut next = guard.clone();
        next.chat_ids.insert(chat_id.0);
        self.persist(&next).await?;
        *guard = next;
        tracing::info!("Registered chat {} for signal broadcasts", chat_id.0);
        Ok(true)
    }

    pub async fn list_chats(&self) -> Vec<ChatId> {
        self.state
            .lock()
            .await
            .chat_ids
            .iter()
            .copied()
            .map(ChatId)
            .collect()
    }

    // The change is applied to a copy and only committed once it is on disk.
    async fn mutate<F>(&self, apply: F) -> Result<PositionState>
    where
        F: FnOnce(&mut PositionState),
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        apply(&mut next);
        self.persist(&next).await?;
        *guard = next.clone();
        Ok(next)
    }

    // Written to a sibling file first and renamed over the state file, so an
    // interrupted write never leaves a truncated record behind.
    async fn persist(&self, state: &PositionState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let temp = temp_path(&self.path);
        let persist_err = |source: std::io::Error| BotError::StatePersist {
            path: self.path.clone(),
            source,
        };

        tokio::fs::write(&temp, json).await.map_err(persist_err)?;
        if let Err(source) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(persist_err(source));
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(".tmp");
    path.with_file_name(name)
}
