use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardMarkup, MessageId},
    ApiError, Bot, RequestError,
};

use crate::error::BotError;

/// Outbound side of the relay: replies, menu edits, callback answers and
/// broadcast deliveries.
///
/// Implemented for the Telegram [`Bot`]; tests substitute a recording sink
/// so handlers and broadcasts can be checked without a network.
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Associated error type for a failed request
    type Error: std::fmt::Display + Send + Sync + 'static;

    /// Sends one rendered state message with its keyboard to a chat.
    ///
    /// # Arguments
    ///
    /// * `chat_id` - Recipient chat
    /// * `text` - Rendered state message
    /// * `keyboard` - Inline keyboard matching the recipient's role
    async fn deliver(
        &self,
        chat_id: ChatId,
        text: String,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), Self::Error>;

    /// Sends a plain text reply.
    async fn reply(&self, chat_id: ChatId, text: String) -> Result<(), Self::Error>;

    /// Replaces the text and keyboard of an existing menu message.
    ///
    /// Editing a menu into exactly what it already shows is not an error.
    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), Self::Error>;

    /// Answers a button press, optionally with a modal alert.
    async fn answer_callback(
        &self,
        query_id: String,
        alert: Option<String>,
    ) -> Result<(), Self::Error>;
}

#[async_trait]
impl SignalSink for Bot {
    type Error = BotError;

    async fn deliver(
        &self,
        chat_id: ChatId,
        text: String,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), Self::Error> {
        self.send_message(chat_id, text)
            .reply_markup(keyboard)
            .await?;
        Ok(())
    }

    async fn reply(&self, chat_id: ChatId, text: String) -> Result<(), Self::Error> {
        self.send_message(chat_id, text).await?;
        Ok(())
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), Self::Error> {
        match self
            .edit_message_text(chat_id, message_id, text)
            .reply_markup(keyboard)
            .await
        {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn answer_callback(
        &self,
        query_id: String,
        alert: Option<String>,
    ) -> Result<(), Self::Error> {
        match alert {
            Some(text) => {
                self.answer_callback_query(query_id)
                    .text(text)
                    .show_alert(true)
                    .await?;
            }
            None => {
                self.answer_callback_query(query_id).await?;
            }
        }
        Ok(())
    }
}
