mod bot;
mod config;
mod event;
mod payload;
mod platform;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::{Config, RunMode};
use crate::platform::telegram::{self, TelegramMessenger};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,webapp_relay_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Mode: {}", config.mode);
    info!(
        "  Web app: {}",
        config
            .web_app_url
            .as_ref()
            .map_or("not configured", |url| url.as_str())
    );
    info!(
        "  Webhook secret: {}",
        if config.webhook_secret.is_some() { "set" } else { "not set" }
    );

    // One platform session for the whole process
    let messenger = Arc::new(TelegramMessenger::new(&config.bot_token));
    let bot = messenger.bot();
    let mode = config.mode;
    let state = Arc::new(AppState::new(config, messenger));

    info!("Bot is starting...");
    match mode {
        RunMode::Polling => telegram::run_polling(state, bot).await?,
        RunMode::Webhook => webhook::serve(state).await?,
    }

    info!("Bot stopped");
    Ok(())
}
