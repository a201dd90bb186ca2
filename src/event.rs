use teloxide::types::{ChatId, Update, UpdateKind};

/// What an inbound update asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Start,
    Ping,
    /// Raw text the mini-app sent through `web_app_data`
    WebAppData(String),
    Other,
}

impl InboundEvent {
    /// Classify by content: mini-app data wins over any text, then the
    /// leading command token (`/start`, `/ping`, optionally `@botname`).
    pub fn classify(text: Option<&str>, web_app_data: Option<&str>) -> Self {
        if let Some(data) = web_app_data {
            return InboundEvent::WebAppData(data.to_string());
        }

        let command = text
            .and_then(|t| t.split_whitespace().next())
            .map(|token| token.split('@').next().unwrap_or(token));

        match command {
            Some("/start") => InboundEvent::Start,
            Some("/ping") => InboundEvent::Ping,
            _ => InboundEvent::Other,
        }
    }
}

/// Turn a platform update into the chat to answer and the event to handle.
/// Updates without a chat cannot be answered and yield `None`.
pub fn from_update(update: &Update) -> Option<(ChatId, InboundEvent)> {
    let chat_id = update.chat()?.id;

    let event = match &update.kind {
        UpdateKind::Message(msg) | UpdateKind::EditedMessage(msg) => InboundEvent::classify(
            msg.text(),
            msg.web_app_data().map(|data| data.data.as_str()),
        ),
        _ => InboundEvent::Other,
    };

    Some((chat_id, event))
}
