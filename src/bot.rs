use std::sync::Arc;

use anyhow::Result;
use teloxide::types::{ChatId, Update};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::event::{self, InboundEvent};
use crate::payload::{self, DecodeError, DecodeOutcome};
use crate::platform::Messenger;

const WELCOME_TEXT: &str = "Welcome! Click the button below to create your Student ID:";
const WEB_APP_BUTTON: &str = "🎓 Create Student ID";
const NO_WEB_APP_TEXT: &str =
    "Bot is running, but the web app is not configured yet. Use /ping to check the connection.";
const PONG_TEXT: &str = "pong";
const HINT_TEXT: &str = "Send /start to open the Student ID web app.";
const DOCUMENT_CAPTION: &str = "✅ Your Student ID card is ready!";
const ECHO_PREFIX: &str = "Данные получены: ";
const SEND_FAILED_TEXT: &str = "⚠️ Something went wrong while sending the reply. Please try again.";

/// Telegram rejects messages longer than 4096 characters
const MAX_MESSAGE_LEN: usize = 4000;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub messenger: Arc<dyn Messenger>,
}

impl AppState {
    pub fn new(config: Config, messenger: Arc<dyn Messenger>) -> Self {
        Self { config, messenger }
    }
}

/// Entry point shared by the polling dispatcher and the webhook endpoint
pub async fn handle_update(state: &AppState, update: &Update) {
    match event::from_update(update) {
        Some((chat_id, event)) => handle_event(state, chat_id, event).await,
        None => warn!("Ignoring update {:?} without a chat", update.id),
    }
}

/// Answer one event with exactly one outbound message. Delivery failures are
/// logged and replaced by an apology; they never reach the caller.
pub async fn handle_event(state: &AppState, chat_id: ChatId, event: InboundEvent) {
    info!("Chat {}: {} event", chat_id.0, event_kind(&event));

    let result = match event {
        InboundEvent::Start => send_start(state, chat_id).await,
        InboundEvent::Ping => state.messenger.send_text(chat_id, PONG_TEXT).await,
        InboundEvent::WebAppData(raw) => handle_web_app_data(state, chat_id, &raw).await,
        InboundEvent::Other => state.messenger.send_text(chat_id, HINT_TEXT).await,
    };

    if let Err(e) = result {
        error!("Failed to reply to chat {}: {:#}", chat_id.0, e);
        if let Err(e) = state.messenger.send_text(chat_id, SEND_FAILED_TEXT).await {
            error!("Failed to deliver apology to chat {}: {:#}", chat_id.0, e);
        }
    }
}

fn event_kind(event: &InboundEvent) -> &'static str {
    match event {
        InboundEvent::Start => "start",
        InboundEvent::Ping => "ping",
        InboundEvent::WebAppData(_) => "web_app_data",
        InboundEvent::Other => "other",
    }
}

async fn send_start(state: &AppState, chat_id: ChatId) -> Result<()> {
    match &state.config.web_app_url {
        Some(url) => {
            state
                .messenger
                .send_web_app_button(chat_id, WELCOME_TEXT, WEB_APP_BUTTON, url)
                .await
        }
        None => state.messenger.send_text(chat_id, NO_WEB_APP_TEXT).await,
    }
}

async fn handle_web_app_data(state: &AppState, chat_id: ChatId, raw: &str) -> Result<()> {
    debug!(
        "Web app data from chat {} ({} bytes): {}",
        chat_id.0,
        raw.len(),
        truncate_chars(raw, 200)
    );

    match payload::decode(raw) {
        Ok(DecodeOutcome::Image(attachment)) => {
            info!(
                "Decoded {} ({}, {} bytes) for chat {}",
                attachment.filename,
                attachment.mime,
                attachment.bytes.len(),
                chat_id.0
            );
            state
                .messenger
                .send_document(chat_id, attachment, DOCUMENT_CAPTION)
                .await
        }
        Ok(DecodeOutcome::NotAnImage(value)) => {
            let text = format!("{}{}", ECHO_PREFIX, value);
            state
                .messenger
                .send_text(chat_id, truncate_chars(&text, MAX_MESSAGE_LEN))
                .await
        }
        Err(err) => {
            warn!("Rejected web app data from chat {}: {}", chat_id.0, err);
            state
                .messenger
                .send_text(chat_id, &decode_error_text(&err))
                .await
        }
    }
}

fn decode_error_text(err: &DecodeError) -> String {
    match err {
        DecodeError::MalformedPayload(_) => "❌ Invalid data received from the web app.".to_string(),
        DecodeError::MalformedDataUrl => "❌ Invalid data URL format.".to_string(),
        DecodeError::InvalidEncoding(e) => format!("❌ Failed to decode image: {}", e),
        DecodeError::EmptyImage => "❌ Failed to decode image: the image is empty.".to_string(),
    }
}

/// Cut `text` to at most `max_chars` characters without splitting one
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::payload::DecodedAttachment;
    use crate::platform::testing::{RecordingMessenger, Sent};
    use teloxide::types::UpdateKind;

    const CHAT: ChatId = ChatId(42);

    fn state_with(web_app_url: Option<&str>, messenger: Arc<RecordingMessenger>) -> AppState {
        let file = FileConfig {
            bot_token: Some("123:abc".to_string()),
            web_app_url: web_app_url.map(str::to_string),
            ..FileConfig::default()
        };
        let config = Config::from_sources(file, |_| None).unwrap();
        AppState::new(config, messenger)
    }

    fn text(text: &str) -> Sent {
        Sent::Text {
            chat_id: CHAT,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_with_web_app_sends_button() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(Some("https://example.github.io/student-id/"), messenger.clone());

        handle_event(&state, CHAT, InboundEvent::Start).await;

        assert_eq!(
            messenger.sent(),
            vec![Sent::WebAppButton {
                chat_id: CHAT,
                text: WELCOME_TEXT.to_string(),
                button_label: WEB_APP_BUTTON.to_string(),
                url: "https://example.github.io/student-id/".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_start_without_web_app_names_fallback() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(None, messenger.clone());

        handle_event(&state, CHAT, InboundEvent::Start).await;

        let sent = messenger.sent();
        assert_eq!(sent, vec![text(NO_WEB_APP_TEXT)]);
        assert!(NO_WEB_APP_TEXT.contains("/ping"));
    }

    #[tokio::test]
    async fn test_ping_and_other() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(None, messenger.clone());

        handle_event(&state, CHAT, InboundEvent::Ping).await;
        handle_event(&state, CHAT, InboundEvent::Other).await;

        assert_eq!(messenger.sent(), vec![text("pong"), text(HINT_TEXT)]);
    }

    #[tokio::test]
    async fn test_image_payload_sends_document() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(None, messenger.clone());
        let raw = r#"{"image":"data:image/png;base64,aGVsbG8=","filename":"x"}"#;

        handle_event(&state, CHAT, InboundEvent::WebAppData(raw.to_string())).await;

        assert_eq!(
            messenger.sent(),
            vec![Sent::Document {
                chat_id: CHAT,
                attachment: DecodedAttachment {
                    bytes: b"hello".to_vec(),
                    filename: "x.png".to_string(),
                    mime: "image/png".to_string(),
                },
                caption: DOCUMENT_CAPTION.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_plain_payload_is_echoed() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(None, messenger.clone());

        handle_event(
            &state,
            CHAT,
            InboundEvent::WebAppData(r#"{"note":"hi"}"#.to_string()),
        )
        .await;

        assert_eq!(messenger.sent(), vec![text(r#"Данные получены: {"note":"hi"}"#)]);
    }

    #[tokio::test]
    async fn test_decode_failures_get_specific_messages() {
        let cases = [
            ("not json at all", "❌ Invalid data received from the web app."),
            (
                r#"{"image":"data:image/png;base64"}"#,
                "❌ Invalid data URL format.",
            ),
        ];
        for (raw, expected) in cases {
            let messenger = Arc::new(RecordingMessenger::default());
            let state = state_with(None, messenger.clone());
            handle_event(&state, CHAT, InboundEvent::WebAppData(raw.to_string())).await;
            assert_eq!(messenger.sent(), vec![text(expected)]);
        }

        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(None, messenger.clone());
        let raw = r#"{"image":"data:image/png;base64,!!!"}"#;
        handle_event(&state, CHAT, InboundEvent::WebAppData(raw.to_string())).await;
        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Text { text, .. } => assert!(text.starts_with("❌ Failed to decode image")),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_image_is_not_uploaded() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(None, messenger.clone());
        let raw = r#"{"image":"data:image/png;base64,","filename":"x"}"#;

        handle_event(&state, CHAT, InboundEvent::WebAppData(raw.to_string())).await;

        assert_eq!(
            messenger.sent(),
            vec![text("❌ Failed to decode image: the image is empty.")]
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_replaced_by_apology() {
        let messenger = Arc::new(RecordingMessenger::failing(1));
        let state = state_with(None, messenger.clone());
        let raw = r#"{"image":"data:image/png;base64,aGVsbG8="}"#;

        handle_event(&state, CHAT, InboundEvent::WebAppData(raw.to_string())).await;

        assert_eq!(messenger.calls(), 2);
        assert_eq!(messenger.sent(), vec![text(SEND_FAILED_TEXT)]);
    }

    #[tokio::test]
    async fn test_apology_failure_is_swallowed() {
        let messenger = Arc::new(RecordingMessenger::failing(2));
        let state = state_with(None, messenger.clone());

        handle_event(&state, CHAT, InboundEvent::Ping).await;

        assert_eq!(messenger.calls(), 2);
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_long_echo_is_truncated() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(None, messenger.clone());
        let raw = serde_json::json!({ "note": "я".repeat(10_000) }).to_string();

        handle_event(&state, CHAT, InboundEvent::WebAppData(raw)).await;

        match &messenger.sent()[0] {
            Sent::Text { text, .. } => assert_eq!(text.chars().count(), MAX_MESSAGE_LEN),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_without_chat_is_dropped() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = state_with(None, messenger.clone());
        let json = serde_json::json!({
            "update_id": 5,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 9, "is_bot": false, "first_name": "Cy" },
                "chat_instance": "ci",
                "inline_message_id": "inline-1",
                "data": "x"
            }
        });
        let update: Update = serde_json::from_str(&json.to_string()).unwrap();
        assert!(matches!(update.kind, UpdateKind::CallbackQuery(_)));

        handle_update(&state, &update).await;

        assert_eq!(messenger.calls(), 0);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("привет", 2), "пр");
    }
}
