use std::collections::HashSet;

use teloxide::types::{ChatId, UserId};

use crate::config::BotConfig;

/// Role predicates over the static configuration
#[derive(Debug, Clone, Default)]
pub struct Roles {
    pub admins: HashSet<UserId>,
    pub master: Option<UserId>,
}

impl Roles {
    pub fn new(admin_ids: impl IntoIterator<Item = u64>, master_id: Option<u64>) -> Self {
        Self {
            admins: admin_ids.into_iter().map(UserId).collect(),
            master: master_id.map(UserId),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(config.admin_ids.iter().copied(), config.master_id)
    }

    /// Master is whoever matches the configured id, or everyone in open mode.
    pub fn is_master(&self, user_id: Option<UserId>) -> bool {
        match self.master {
            None => true,
            Some(master) => user_id == Some(master),
        }
    }

    /// Admins only get a different menu heading.
    pub fn is_admin(&self, user_id: Option<UserId>) -> bool {
        user_id.is_some_and(|id| self.admins.contains(&id))
    }

    /// Resolves a chat as if it were the user of the same id. Private chats
    /// share their id with the user; groups never match.
    pub fn chat_as_user(chat_id: ChatId) -> Option<UserId> {
        u64::try_from(chat_id.0).ok().map(UserId)
    }
}
