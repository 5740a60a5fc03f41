use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    types::{ChatId, MessageId, UserId},
    utils::command::BotCommands,
    RequestError,
};

use crate::{
    dispatch::{Action, ActionOutcome, SignalDispatcher, StopLossOutcome},
    error::Result,
    render::{
        DENIED_SIGNAL_ALERT, DENIED_STOP_LOSS_MESSAGE, STOP_LOSS_FORMAT_ERROR,
        STOP_LOSS_USAGE_MESSAGE,
    },
    traits::SignalSink,
};

#[derive(Debug, BotCommands, Clone, PartialEq)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
pub enum Command {
    #[command(description = "show the signal menu.")]
    Start,
    #[command(description = "set the stop-loss (/stoploss <price|clear>).")]
    Stoploss(String),
    #[command(description = "display this text.")]
    Help,
}

/// A button press, detached from the update that carried it
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub query_id: String,
    pub data: Option<String>,
    pub user_id: UserId,
    /// Chat and message holding the pressed keyboard, if still accessible.
    pub origin: Option<(ChatId, MessageId)>,
}

impl CallbackEvent {
    pub fn from_query(query: &CallbackQuery) -> Self {
        Self {
            query_id: query.id.clone(),
            data: query.data.clone(),
            user_id: query.from.id,
            origin: query
                .message
                .as_ref()
                .map(|message| (message.chat().id, message.id())),
        }
    }
}

// Outbound failures are logged and never stop the rest of a handler.
fn log_failure<E: std::fmt::Display>(what: &str, result: std::result::Result<(), E>) {
    if let Err(err) = result {
        tracing::warn!("Failed to send {what}: {err}");
    }
}

/// Telegram front end over a [`SignalDispatcher`]
pub struct TelegramBotHandler {
    dispatcher: SignalDispatcher,
}

impl TelegramBotHandler {
    pub fn new(dispatcher: SignalDispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &SignalDispatcher {
        &self.dispatcher
    }

    /// Handle incoming Telegram commands
    pub async fn handle_command<S: SignalSink>(
        &self,
        sink: &S,
        chat_id: ChatId,
        user_id: Option<UserId>,
        cmd: Command,
    ) {
        if let Err(err) = self.try_command(sink, chat_id, user_id, cmd).await {
            tracing::error!("Command in chat {} failed: {err}", chat_id.0);
            log_failure(
                "error reply",
                sink.reply(chat_id, err.user_message().to_string()).await,
            );
        }
    }

    async fn try_command<S: SignalSink>(
        &self,
        sink: &S,
        chat_id: ChatId,
        user_id: Option<UserId>,
        cmd: Command,
    ) -> Result<()> {
        match cmd {
            Command::Start => {
                let state = self.dispatcher.start(chat_id).await?;
                let (text, keyboard) = self.dispatcher.render_for(&state, user_id);
                log_failure("menu", sink.deliver(chat_id, text, keyboard).await);
            }
            Command::Stoploss(args) => {
                let reply = match self
                    .dispatcher
                    .handle_stop_loss(&args, user_id, chat_id)
                    .await?
                {
                    StopLossOutcome::Updated(state) => {
                        let (text, keyboard) = self.dispatcher.render_for(&state, user_id);
                        log_failure("menu", sink.deliver(chat_id, text, keyboard).await);
                        self.dispatcher.broadcast(sink, &state, Some(chat_id)).await;
                        return Ok(());
                    }
                    StopLossOutcome::Denied => DENIED_STOP_LOSS_MESSAGE,
                    StopLossOutcome::MissingArgument => STOP_LOSS_USAGE_MESSAGE,
                    StopLossOutcome::InvalidPrice(raw) => {
                        tracing::debug!("Unparseable stop-loss price '{raw}'");
                        STOP_LOSS_FORMAT_ERROR
                    }
                };
                log_failure("reply", sink.reply(chat_id, reply.to_string()).await);
            }
            Command::Help => {
                log_failure(
                    "help",
                    sink.reply(chat_id, Command::descriptions().to_string()).await,
                );
            }
        }

        Ok(())
    }

    /// Handle inline button presses. The query is answered on every path.
    pub async fn handle_callback<S: SignalSink>(&self, sink: &S, event: CallbackEvent) {
        if let Err(err) = self.try_callback(sink, &event).await {
            tracing::error!("Callback from user {} failed: {err}", event.user_id.0);
            log_failure(
                "error alert",
                sink.answer_callback(event.query_id.clone(), Some(err.user_message().to_string()))
                    .await,
            );
        }
    }

    async fn try_callback<S: SignalSink>(&self, sink: &S, event: &CallbackEvent) -> Result<()> {
        let action = Action::from_callback_data(event.data.as_deref().unwrap_or_default());
        let chat_id = event.origin.map(|(chat_id, _)| chat_id);

        let outcome = self
            .dispatcher
            .handle_action(action, Some(event.user_id), chat_id)
            .await?;

        let alert = matches!(outcome, ActionOutcome::Denied(_))
            .then(|| DENIED_SIGNAL_ALERT.to_string());
        log_failure(
            "callback answer",
            sink.answer_callback(event.query_id.clone(), alert).await,
        );

        if let Some((chat_id, message_id)) = event.origin {
            let (text, keyboard) = self
                .dispatcher
                .render_for(outcome.state(), Some(event.user_id));
            log_failure(
                "menu edit",
                sink.edit(chat_id, message_id, text, keyboard).await,
            );
        }
        if let ActionOutcome::Updated(state) = &outcome {
            self.dispatcher.broadcast(sink, state, chat_id).await;
        }

        Ok(())
    }

    /// Publish the command list and poll for updates until ctrl-c.
    pub async fn run(self, bot: Bot) {
        if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
            tracing::warn!("Failed to publish bot commands: {err}");
        }

        Dispatcher::builder(bot, schema())
            .dependencies(dptree::deps![Arc::new(self)])
            .default_handler(|update| async move {
                tracing::trace!("Ignoring unhandled update {:?}", update.id);
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }
}

/// Message commands and callback queries, everything else is ignored.
pub fn schema() -> UpdateHandler<RequestError> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(on_command),
        )
        .branch(Update::filter_callback_query().endpoint(on_callback))
}

async fn on_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    handler: Arc<TelegramBotHandler>,
) -> ResponseResult<()> {
    let user_id = msg.from.as_ref().map(|user| user.id);
    handler.handle_command(&bot, msg.chat.id, user_id, cmd).await;
    Ok(())
}

async fn on_callback(
    bot: Bot,
    query: CallbackQuery,
    handler: Arc<TelegramBotHandler>,
) -> ResponseResult<()> {
    handler
        .handle_callback(&bot, CallbackEvent::from_query(&query))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use teloxide::types::InlineKeyboardMarkup;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    use super::*;
    use crate::{roles::Roles, state::Position, state::StateStore};

    const MASTER: UserId = UserId(42);
    const MASTER_CHAT: ChatId = ChatId(42);
    const FOLLOWER: UserId = UserId(7);
    const FOLLOWER_CHAT: ChatId = ChatId(7);

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Deliver(ChatId, String),
        Reply(ChatId, String),
        Edit(ChatId, String),
        Answer(Option<String>),
    }

    /// Records outbound requests; requests to `failing` chats and callback
    /// answers (when `fail_answers` is set) are rejected.
    #[derive(Default)]
    struct RecordingSink {
        failing: Vec<ChatId>,
        fail_answers: bool,
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingSink {
        fn record(&self, chat_id: Option<ChatId>, sent: Sent) -> std::result::Result<(), String> {
            if chat_id.is_some_and(|chat_id| self.failing.contains(&chat_id)) {
                return Err("chat not found".to_string());
            }
            self.sent.lock().unwrap().push(sent);
            Ok(())
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn delivered_to(&self) -> Vec<ChatId> {
            self.sent()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Deliver(chat_id, _) => Some(chat_id),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl SignalSink for RecordingSink {
        type Error = String;

        async fn deliver(
            &self,
            chat_id: ChatId,
            text: String,
            _keyboard: InlineKeyboardMarkup,
        ) -> std::result::Result<(), Self::Error> {
            self.record(Some(chat_id), Sent::Deliver(chat_id, text))
        }

        async fn reply(&self, chat_id: ChatId, text: String) -> std::result::Result<(), Self::Error> {
            self.record(Some(chat_id), Sent::Reply(chat_id, text))
        }

        async fn edit(
            &self,
            chat_id: ChatId,
            _message_id: MessageId,
            text: String,
            _keyboard: InlineKeyboardMarkup,
        ) -> std::result::Result<(), Self::Error> {
            self.record(Some(chat_id), Sent::Edit(chat_id, text))
        }

        async fn answer_callback(
            &self,
            _query_id: String,
            alert: Option<String>,
        ) -> std::result::Result<(), Self::Error> {
            if self.fail_answers {
                return Err("query is too old".to_string());
            }
            self.record(None, Sent::Answer(alert))
        }
    }

    async fn relay(dir: &TempDir) -> TelegramBotHandler {
        let store = assert_ok!(StateStore::load(dir.path().join("state.json")).await);
        let dispatcher = SignalDispatcher::new(store, Roles::new([], Some(MASTER.0)));
        assert_ok!(dispatcher.start(FOLLOWER_CHAT).await);
        TelegramBotHandler::new(dispatcher)
    }

    fn press(action: Action, user_id: UserId, chat_id: ChatId) -> CallbackEvent {
        CallbackEvent {
            query_id: "query".to_string(),
            data: Some(action.as_str().to_string()),
            user_id,
            origin: Some((chat_id, MessageId(1))),
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/start", "relay_bot").unwrap(), Command::Start);
        assert_eq!(
            Command::parse("/stoploss 1234,5", "relay_bot").unwrap(),
            Command::Stoploss("1234,5".to_string())
        );
        assert_eq!(
            Command::parse("/stoploss", "relay_bot").unwrap(),
            Command::Stoploss(String::new())
        );
        assert_eq!(Command::parse("/help", "relay_bot").unwrap(), Command::Help);
        assert!(Command::parse("/open", "relay_bot").is_err());
    }

    #[test]
    fn every_command_is_described() {
        let descriptions = Command::descriptions().to_string();
        assert!(descriptions.contains("/start"));
        assert!(descriptions.contains("/stoploss"));
        assert!(descriptions.contains("/help"));
    }

    #[tokio::test]
    async fn start_sends_menu_to_the_caller() {
        let dir = TempDir::new().unwrap();
        let handler = relay(&dir).await;
        let sink = RecordingSink::default();

        handler
            .handle_command(&sink, MASTER_CHAT, Some(MASTER), Command::Start)
            .await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::Deliver(chat, text)
            if *chat == MASTER_CHAT && text.contains("Статус позиции: Закрыто")));
        assert!(handler
            .dispatcher()
            .store()
            .list_chats()
            .await
            .contains(&MASTER_CHAT));
    }

    #[tokio::test]
    async fn denied_button_shows_alert_without_broadcast() {
        let dir = TempDir::new().unwrap();
        let handler = relay(&dir).await;
        let sink = RecordingSink::default();

        handler
            .handle_callback(&sink, press(Action::Close, FOLLOWER, FOLLOWER_CHAT))
            .await;

        let sent = sink.sent();
        assert_eq!(sent[0], Sent::Answer(Some(DENIED_SIGNAL_ALERT.to_string())));
        assert!(matches!(&sent[1], Sent::Edit(chat, _) if *chat == FOLLOWER_CHAT));
        assert_eq!(sent.len(), 2);
        assert_eq!(handler.dispatcher().store().read().await.last_action, "initial");
    }

    #[tokio::test]
    async fn stop_loss_input_problems_get_plain_replies() {
        let dir = TempDir::new().unwrap();
        let handler = relay(&dir).await;
        let sink = RecordingSink::default();

        for (user_id, args) in [(MASTER, ""), (MASTER, "abc"), (FOLLOWER, "100")] {
            handler
                .handle_command(&sink, MASTER_CHAT, Some(user_id), Command::Stoploss(args.to_string()))
                .await;
        }

        assert_eq!(
            sink.sent(),
            vec![
                Sent::Reply(MASTER_CHAT, STOP_LOSS_USAGE_MESSAGE.to_string()),
                Sent::Reply(MASTER_CHAT, STOP_LOSS_FORMAT_ERROR.to_string()),
                Sent::Reply(MASTER_CHAT, DENIED_STOP_LOSS_MESSAGE.to_string()),
            ]
        );
        assert_eq!(handler.dispatcher().store().read().await.stop_loss, None);
    }

    #[tokio::test]
    async fn stop_loss_update_replies_then_broadcasts() {
        let dir = TempDir::new().unwrap();
        let handler = relay(&dir).await;
        let sink = RecordingSink::default();

        handler
            .handle_command(&sink, MASTER_CHAT, Some(MASTER), Command::Stoploss("100".to_string()))
            .await;

        assert_eq!(sink.delivered_to(), vec![MASTER_CHAT, FOLLOWER_CHAT]);
        assert!(matches!(&sink.sent()[1], Sent::Deliver(_, text) if text.contains("Стоп-лосс: 100.0")));
    }

    #[tokio::test]
    async fn broadcast_survives_failed_edit_and_answer() {
        let dir = TempDir::new().unwrap();
        let handler = relay(&dir).await;
        let sink = RecordingSink {
            failing: vec![MASTER_CHAT],
            fail_answers: true,
            ..RecordingSink::default()
        };

        handler
            .handle_callback(&sink, press(Action::OpenLong, MASTER, MASTER_CHAT))
            .await;

        assert_eq!(handler.dispatcher().store().read().await.status, Position::Long);
        assert_eq!(sink.delivered_to(), vec![FOLLOWER_CHAT]);
    }

    #[tokio::test]
    async fn broadcast_survives_failed_stop_loss_reply() {
        let dir = TempDir::new().unwrap();
        let handler = relay(&dir).await;
        let sink = RecordingSink {
            failing: vec![MASTER_CHAT],
            ..RecordingSink::default()
        };

        handler
            .handle_command(&sink, MASTER_CHAT, Some(MASTER), Command::Stoploss("clear".to_string()))
            .await;

        assert_eq!(sink.delivered_to(), vec![FOLLOWER_CHAT]);
    }

    #[tokio::test]
    async fn save_failures_are_reported_to_the_user() {
        let dir = TempDir::new().unwrap();
        let handler = relay(&dir).await;
        // A directory at the state path makes every write fail.
        std::fs::remove_file(dir.path().join("state.json")).unwrap();
        std::fs::create_dir(dir.path().join("state.json")).unwrap();
        let sink = RecordingSink::default();

        handler
            .handle_callback(&sink, press(Action::OpenLong, MASTER, MASTER_CHAT))
            .await;
        handler
            .handle_command(&sink, MASTER_CHAT, Some(MASTER), Command::Stoploss("5".to_string()))
            .await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::Answer(Some(text)) if text.contains("сохранить")));
        assert!(matches!(&sent[1], Sent::Reply(chat, text)
            if *chat == MASTER_CHAT && text.contains("сохранить")));
        assert_eq!(handler.dispatcher().store().read().await.status, Position::Closed);
    }
}
