use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use metrics::counter;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use snowbot_twitch::{OAuthError, TwitchOAuthClient};

use crate::router::AppState;

/// Scopes requested from the broadcaster for gift lookups and follow v2.
pub const USER_SCOPES: &[&str] = &[
    "channel:read:subscriptions",
    "user:read:subscriptions",
    "moderator:read:followers",
];

pub const CALLBACK_PATH: &str = "auth";
pub const CALLBACK_BODY: &str = "Retrieved user token!";

/// Broadcaster user token captured from the authorization callback.
///
/// Empty until the broadcaster completes the authorization flow.
#[derive(Clone, Default)]
pub struct UserTokenStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl UserTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<String> {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, token: String) {
        *self.inner.write().await = Some(token);
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `GET /auth`: exchanges the authorization code for a user token.
///
/// Always acknowledges with 200; failures are only logged.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, &'static str) {
    match query.code.as_deref().filter(|code| !code.is_empty()) {
        Some(code) => {
            if let Err(err) =
                exchange_user_token(state.oauth(), state.user_tokens(), code, state.redirect_uri())
                    .await
            {
                counter!("user_token_exchanges_total", "result" => "error").increment(1);
                error!(stage = "oauth", error = %err, "failed to exchange authorization code");
            }
        }
        None => warn!(
            stage = "oauth",
            error = query.error.as_deref().unwrap_or("missing_code"),
            "authorization callback without code"
        ),
    }

    (StatusCode::OK, CALLBACK_BODY)
}

async fn exchange_user_token(
    oauth: &TwitchOAuthClient,
    store: &UserTokenStore,
    code: &str,
    redirect_uri: &str,
) -> Result<(), OAuthError> {
    let token = oauth.exchange_code(code, redirect_uri).await?;
    store.set(token.access_token).await;
    counter!("user_token_exchanges_total", "result" => "ok").increment(1);
    info!(stage = "oauth", scopes = ?token.scope, "stored broadcaster user token");
    Ok(())
}
