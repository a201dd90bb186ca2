pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::types::ChatId;
use url::Url;

use crate::payload::DecodedAttachment;

/// Outbound side of the messaging platform.
///
/// One instance is created at startup and shared by every handler; it must
/// be safe for concurrent use.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()>;

    /// Send `text` with a single keyboard button that opens `url` as a mini-app
    async fn send_web_app_button(
        &self,
        chat_id: ChatId,
        text: &str,
        button_label: &str,
        url: &Url,
    ) -> Result<()>;

    async fn send_document(
        &self,
        chat_id: ChatId,
        attachment: DecodedAttachment,
        caption: &str,
    ) -> Result<()>;

    /// Point the platform's update delivery at `url`
    async fn register_webhook(&self, url: &Url) -> Result<()>;
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        Text {
            chat_id: ChatId,
            text: String,
        },
        WebAppButton {
            chat_id: ChatId,
            text: String,
            button_label: String,
            url: String,
        },
        Document {
            chat_id: ChatId,
            attachment: DecodedAttachment,
            caption: String,
        },
        Webhook(String),
    }

    /// Messenger that records deliveries and can fail the first `n` calls.
    #[derive(Default)]
    pub struct RecordingMessenger {
        sent: Mutex<Vec<Sent>>,
        calls: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl RecordingMessenger {
        pub fn failing(n: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(n),
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        /// Every call, delivered or failed
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn record(&self, sent: Sent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                anyhow::bail!("simulated delivery failure");
            }
            self.sent.lock().unwrap().push(sent);
            Ok(())
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
            self.record(Sent::Text {
                chat_id,
                text: text.to_string(),
            })
        }

        async fn send_web_app_button(
            &self,
            chat_id: ChatId,
            text: &str,
            button_label: &str,
            url: &Url,
        ) -> Result<()> {
            self.record(Sent::WebAppButton {
                chat_id,
                text: text.to_string(),
                button_label: button_label.to_string(),
                url: url.to_string(),
            })
        }

        async fn send_document(
            &self,
            chat_id: ChatId,
            attachment: DecodedAttachment,
            caption: &str,
        ) -> Result<()> {
            self.record(Sent::Document {
                chat_id,
                attachment,
                caption: caption.to_string(),
            })
        }

        async fn register_webhook(&self, url: &Url) -> Result<()> {
            self.record(Sent::Webhook(url.to_string()))
        }
    }
}
