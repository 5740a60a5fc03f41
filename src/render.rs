use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::{
    dispatch::Action,
    state::{Position, PositionState},
};

pub const DENIED_SIGNAL_ALERT: &str = "Только главный аккаунт может менять сигналы.";
pub const DENIED_STOP_LOSS_MESSAGE: &str = "Только главный аккаунт может менять стоп-лосс.";
pub const STOP_LOSS_USAGE_MESSAGE: &str =
    "Укажите цену стоп-лосса: /stoploss <цена>. Для сброса используйте /stoploss clear";
pub const STOP_LOSS_FORMAT_ERROR: &str = "Не удалось прочитать цену. Пример: /stoploss 1234.5";

fn status_label(status: Position) -> &'static str {
    match status {
        Position::Closed => "Закрыто",
        Position::Long => "Открыт лонг",
        Position::Short => "Открыт шорт",
    }
}

/// Whole prices keep one decimal place (`100.0`), others print as is.
pub fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{price:.1}")
    } else {
        price.to_string()
    }
}

/// Renders the menu text for one viewer.
pub fn render_state_message(state: &PositionState, is_admin: bool, is_master: bool) -> String {
    let mut lines = vec![
        if is_admin { "Главное меню" } else { "Меню сигналов" }.to_string(),
        format!("Статус позиции: {}", status_label(state.status)),
    ];

    match state.stop_loss {
        Some(price) => lines.push(format!("Стоп-лосс: {}", format_price(price))),
        None => lines.push("Стоп-лосс: не задан".to_string()),
    }
    if let Some(user_id) = state.updated_by {
        lines.push(format!("Последнее действие от пользователя {user_id}"));
    }

    lines.push(
        "Только главный аккаунт задаёт сигналы, остальные повторяют открытие/закрытие и стоп-лосс."
            .to_string(),
    );
    lines.push(
        if is_master {
            "Используйте кнопки или команду /stoploss <цена>, чтобы обновить стоп-лосс."
        } else {
            "Получайте сигналы и повторяйте их на своих аккаунтах."
        }
        .to_string(),
    );

    lines.join("\n")
}

/// Trading buttons for the master, refresh for everyone.
pub fn build_keyboard(is_master: bool) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if is_master {
        rows.push(vec![
            InlineKeyboardButton::callback("📈 Открыть лонг", Action::OpenLong.as_str()),
            InlineKeyboardButton::callback("📉 Открыть шорт", Action::OpenShort.as_str()),
        ]);
        rows.push(vec![InlineKeyboardButton::callback(
            "❌ Закрыть позицию",
            Action::Close.as_str(),
        )]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "🔄 Обновить",
        Action::Refresh.as_str(),
    )]);
    InlineKeyboardMarkup::new(rows)
}
