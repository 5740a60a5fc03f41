use teloxide::types::{ChatId, InlineKeyboardMarkup, UserId};

use crate::{
    error::Result,
    render::{build_keyboard, render_state_message},
    roles::Roles,
    state::{Direction, PositionState, StateStore},
    traits::SignalSink,
};

/// Inline button payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenLong,
    OpenShort,
    Close,
    Refresh,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::OpenLong => "open_long",
            Action::OpenShort => "open_short",
            Action::Close => "close",
            Action::Refresh => "refresh",
        }
    }

    /// Unknown payloads (stale keyboards, older versions) fall back to a refresh.
    pub fn from_callback_data(data: &str) -> Self {
        match data {
            "open_long" => Action::OpenLong,
            "open_short" => Action::OpenShort,
            "close" => Action::Close,
            _ => Action::Refresh,
        }
    }
}

/// Parsed argument of `/stoploss`
#[derive(Debug, Clone, PartialEq)]
pub enum StopLossArg {
    Missing,
    Clear,
    Price(f64),
    Invalid(String),
}

impl StopLossArg {
    pub fn parse(args: &str) -> Self {
        let Some(raw) = args.split_whitespace().next() else {
            return StopLossArg::Missing;
        };
        if ["clear", "none", "reset"]
            .iter()
            .any(|word| raw.eq_ignore_ascii_case(word))
        {
            return StopLossArg::Clear;
        }
        match parse_price(raw) {
            Some(price) => StopLossArg::Price(price),
            None => StopLossArg::Invalid(raw.to_string()),
        }
    }
}

/// Parses a price, accepting a decimal comma. Non-finite values are rejected.
pub fn parse_price(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|price| price.is_finite())
}

/// Result of a button press
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// State changed and should be broadcast.
    Updated(PositionState),
    /// Nothing changed; re-render as is.
    Unchanged(PositionState),
    /// Caller may not change signals.
    Denied(PositionState),
}

impl ActionOutcome {
    pub fn state(&self) -> &PositionState {
        match self {
            ActionOutcome::Updated(state)
            | ActionOutcome::Unchanged(state)
            | ActionOutcome::Denied(state) => state,
        }
    }
}

/// Result of a `/stoploss` command
#[derive(Debug, Clone, PartialEq)]
pub enum StopLossOutcome {
    Updated(PositionState),
    Denied,
    MissingArgument,
    InvalidPrice(String),
}

/// Per-recipient results of a broadcast
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<ChatId>,
    pub failed: Vec<(ChatId, String)>,
}

/// Maps inbound actions to state changes after checking the caller's role.
pub struct SignalDispatcher {
    store: StateStore,
    roles: Roles,
}

impl SignalDispatcher {
    pub fn new(store: StateStore, roles: Roles) -> Self {
        Self { store, roles }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    // Mutations are stamped with their actor, so an anonymous caller can
    // never mutate even in open mode.
    fn master_actor(&self, user_id: Option<UserId>) -> Option<UserId> {
        user_id.filter(|id| self.roles.is_master(Some(*id)))
    }

    async fn register(&self, chat_id: Option<ChatId>) -> Result<()> {
        if let Some(chat_id) = chat_id {
            self.store.register_chat(chat_id).await?;
        }
        Ok(())
    }

    /// Handles `/start`: registers the chat and returns the current state.
    pub async fn start(&self, chat_id: ChatId) -> Result<PositionState> {
        self.store.register_chat(chat_id).await?;
        Ok(self.store.read().await)
    }

    /// Handles an inline button press.
    pub async fn handle_action(
        &self,
        action: Action,
        user_id: Option<UserId>,
        chat_id: Option<ChatId>,
    ) -> Result<ActionOutcome> {
        self.register(chat_id).await?;

        // `None` closes the position.
        let direction = match action {
            Action::Refresh => return Ok(ActionOutcome::Unchanged(self.store.read().await)),
            Action::OpenLong => Some(Direction::Long),
            Action::OpenShort => Some(Direction::Short),
            Action::Close => None,
        };
        let Some(actor) = self.master_actor(user_id) else {
            tracing::warn!(
                "Rejected {} from non-master user {:?}",
                action.as_str(),
                user_id.map(|id| id.0)
            );
            return Ok(ActionOutcome::Denied(self.store.read().await));
        };

        let state = match direction {
            Some(direction) => self.store.open_position(direction, actor).await?,
            None => self.store.close_position(actor).await?,
        };
        tracing::info!("Position is now {} (set by {})", state.status, actor.0);
        Ok(ActionOutcome::Updated(state))
    }

    /// Handles `/stoploss <price|clear|none|reset>`.
    pub async fn handle_stop_loss(
        &self,
        args: &str,
        user_id: Option<UserId>,
        chat_id: ChatId,
    ) -> Result<StopLossOutcome> {
        let Some(actor) = self.master_actor(user_id) else {
            return Ok(StopLossOutcome::Denied);
        };

        let value = match StopLossArg::parse(args) {
            StopLossArg::Missing => return Ok(StopLossOutcome::MissingArgument),
            StopLossArg::Invalid(raw) => {
                self.store.register_chat(chat_id).await?;
                return Ok(StopLossOutcome::InvalidPrice(raw));
            }
            StopLossArg::Clear => None,
            StopLossArg::Price(price) => Some(price),
        };

        self.store.register_chat(chat_id).await?;
        let state = self.store.update_stop_loss(value, actor).await?;
        tracing::info!("Stop-loss is now {:?} (set by {})", state.stop_loss, actor.0);
        Ok(StopLossOutcome::Updated(state))
    }

    /// Text and keyboard for a viewer with the given identity.
    pub fn render_for(
        &self,
        state: &PositionState,
        user_id: Option<UserId>,
    ) -> (String, InlineKeyboardMarkup) {
        let is_master = self.roles.is_master(user_id);
        (
            render_state_message(state, self.roles.is_admin(user_id), is_master),
            build_keyboard(is_master),
        )
    }

    /// Pushes `state` to every registered chat except `exclude`.
    ///
    /// Each recipient is rendered for its own role. A failed delivery is
    /// logged and recorded; it never stops the remaining sends.
    pub async fn broadcast<S: SignalSink>(
        &self,
        sink: &S,
        state: &PositionState,
        exclude: Option<ChatId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for chat_id in self.store.list_chats().await {
            if Some(chat_id) == exclude {
                continue;
            }
            let (text, keyboard) = self.render_for(state, Roles::chat_as_user(chat_id));
            match sink.deliver(chat_id, text, keyboard).await {
                Ok(()) => report.delivered.push(chat_id),
                Err(err) => {
                    tracing::warn!("Failed to deliver signal to chat {}: {err}", chat_id.0);
                    report.failed.push((chat_id, err.to_string()));
                }
            }
        }

        tracing::debug!(
            "Broadcast finished: {} delivered, {} failed",
            report.delivered.len(),
            report.failed.len()
        );
        report
    }
}
