use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use subtle::ConstantTimeEq;
use url::Url;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Polling,
    Webhook,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Polling => write!(f, "polling"),
            RunMode::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" => Ok(RunMode::Polling),
            "webhook" => Ok(RunMode::Webhook),
            other => anyhow::bail!("Unknown run mode '{}' (expected 'polling' or 'webhook')", other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("BOT_TOKEN is not set")]
    MissingBotToken,
}

/// Raw file layout. Every key is optional so the environment can fill the gaps.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub web_app_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub mode: Option<RunMode>,
    #[serde(default)]
    pub bind_addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    /// Mini-app opened by the /start keyboard button
    pub web_app_url: Option<Url>,
    /// Path secret required by `/webhook/{token}` and `/set-webhook`
    pub webhook_secret: Option<String>,
    /// Externally reachable base URL used when registering the webhook
    pub public_url: Option<Url>,
    pub mode: RunMode,
    pub bind_addr: SocketAddr,
}

fn default_port() -> u16 {
    8080
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Read the optional TOML file at `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            FileConfig::default()
        };

        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Merge file values with an environment lookup; the environment wins.
    pub fn from_sources<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str, fallback: Option<String>| non_empty(env(key)).or(non_empty(fallback));

        let bot_token = pick("BOT_TOKEN", file.bot_token).ok_or(ConfigError::MissingBotToken)?;

        let web_app_url = pick("WEB_APP_URL", file.web_app_url)
            .map(|raw| Url::parse(&raw).with_context(|| format!("Invalid WEB_APP_URL: {}", raw)))
            .transpose()?;

        let public_url = pick("PUBLIC_URL", file.public_url)
            .map(|raw| Url::parse(&raw).with_context(|| format!("Invalid PUBLIC_URL: {}", raw)))
            .transpose()?;

        let mode = match non_empty(env("BOT_MODE")) {
            Some(raw) => raw.parse()?,
            None => file.mode.unwrap_or_default(),
        };

        let bind_addr = match pick("BIND_ADDR", file.bind_addr) {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid BIND_ADDR: {}", raw))?,
            None => {
                let port = match non_empty(env("PORT")) {
                    Some(raw) => raw
                        .parse::<u16>()
                        .with_context(|| format!("Invalid PORT: {}", raw))?,
                    None => default_port(),
                };
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        Ok(Config {
            bot_token,
            web_app_url,
            webhook_secret: pick("WEBHOOK_SECRET", file.webhook_secret),
            public_url,
            mode,
            bind_addr,
        })
    }

    /// Whether `provided` matches the configured webhook secret.
    /// Always false when no secret is configured. Compared in constant time.
    pub fn webhook_token_matches(&self, provided: &str) -> bool {
        match &self.webhook_secret {
            Some(secret) => {
                let (expected, provided) = (secret.as_bytes(), provided.as_bytes());
                expected.len() == provided.len() && expected.ct_eq(provided).into()
            }
            None => false,
        }
    }
}
