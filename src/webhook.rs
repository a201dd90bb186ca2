//! Webhook deployment: Telegram POSTs each update to `/webhook/{token}`.
//!
//! `GET /set-webhook?token=<secret>` registers this server with Telegram and
//! `GET /` answers liveness checks.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use teloxide::types::Update;
use tracing::{error, info, warn};
use url::Url;

use crate::bot::{self, AppState};
use crate::config::Config;

#[derive(Debug, Serialize)]
struct ApiResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            ok: true,
            url: None,
            error: None,
        }
    }

    fn registered(url: &Url) -> Self {
        Self {
            ok: true,
            url: Some(url.to_string()),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            url: None,
            error: Some(message.into()),
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

fn forbidden() -> Reply {
    (StatusCode::FORBIDDEN, Json(ApiResponse::error("forbidden")))
}

#[derive(Deserialize)]
struct SetWebhookQuery {
    #[serde(default)]
    token: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook/{token}", post(receive_update))
        .route("/set-webhook", get(set_webhook))
        .with_state(state)
}

/// Serve the webhook endpoints until Ctrl-C
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.bind_addr;
    if state.config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET is not set; every webhook request will be refused");
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Webhook server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested, draining webhook server..."),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn health() -> Json<ApiResponse> {
    Json(ApiResponse::ok())
}

async fn receive_update(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Reply {
    if !state.config.webhook_token_matches(&token) {
        warn!("Rejected webhook call with an invalid token");
        return forbidden();
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Bad update payload: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error("invalid update")),
            );
        }
    };

    bot::handle_update(&state, &update).await;
    (StatusCode::OK, Json(ApiResponse::ok()))
}

async fn set_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SetWebhookQuery>,
    headers: HeaderMap,
) -> Reply {
    let token = query.token.unwrap_or_default();
    if !state.config.webhook_token_matches(&token) {
        warn!("Rejected set-webhook call with an invalid token");
        return forbidden();
    }

    let Some(base) = public_base(&state.config, &headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("public url unknown")),
        );
    };

    let url = match webhook_url(&base, &token) {
        Ok(url) => url,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    };

    match state.messenger.register_webhook(&url).await {
        Ok(()) => {
            info!("Webhook registered under {}", base);
            (StatusCode::OK, Json(ApiResponse::registered(&url)))
        }
        Err(e) => {
            error!("Webhook registration failed: {:#}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error(format!("{:#}", e))),
            )
        }
    }
}

/// Configured public URL, else `https://<Host>` of the incoming request
fn public_base(config: &Config, headers: &HeaderMap) -> Option<Url> {
    if let Some(url) = &config.public_url {
        return Some(url.clone());
    }
    let host = headers.get(header::HOST)?.to_str().ok()?;
    Url::parse(&format!("https://{}", host)).ok()
}

fn webhook_url(base: &Url, token: &str) -> Result<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| anyhow!("public url cannot be a base: {}", base))?
        .pop_if_empty()
        .push("webhook")
        .push(token);
    Ok(url)
}
