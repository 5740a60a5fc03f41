pub mod bot;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod render;
pub mod roles;
pub mod state;
pub mod traits;

pub use bot::{schema, CallbackEvent, Command, TelegramBotHandler};
pub use config::BotConfig;
pub use dispatch::{Action, ActionOutcome, BroadcastReport, SignalDispatcher, StopLossOutcome};
pub use error::BotError;
pub use roles::Roles;
pub use state::{Direction, Position, PositionState, StateStore};
pub use teloxide::{prelude::*, types::ChatId, Bot};
pub use traits::SignalSink;
