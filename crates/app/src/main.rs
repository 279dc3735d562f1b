mod chat;
mod oauth;
mod problem;
mod reconcile;
mod relay;
mod router;
mod signature;
mod startup;
mod telemetry;
mod token;
mod webhook;

use std::sync::Arc;

use tokio::{net::TcpListener, sync::Mutex};
use tracing::info;
use url::Url;

use snowbot_core::{DedupState, SubscriptionSpec};
use snowbot_twitch::{HelixClient, TwitchOAuthClient};
use snowbot_util::{load_env_file, AppConfig};

use chat::{ChatBot, ChatConnection, ChatSender};
use oauth::UserTokenStore;
use reconcile::SubscriptionReconciler;
use relay::{GifterLookup, NotificationRelay, DEFAULT_LOOKUP_TIMEOUT};
use signature::SignatureVerifier;
use startup::StartupSequence;
use token::TokenManager;

const TWITCH_OAUTH_BASE: &str = "https://id.twitch.tv/oauth2/";
const TWITCH_HELIX_BASE: &str = "https://api.twitch.tv/helix/";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    if let Some(path) = env_file {
        info!(stage = "startup", path = %path.display(), "loaded environment file");
    }
    let metrics = telemetry::init_metrics()?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;
    let oauth_client = TwitchOAuthClient::new(
        config.twitch.client_id.clone(),
        config.twitch.client_secret.clone(),
        Url::parse(TWITCH_OAUTH_BASE)?,
        http.clone(),
    );
    let helix = HelixClient::new(
        config.twitch.client_id.clone(),
        Url::parse(TWITCH_HELIX_BASE)?,
        http,
    );

    let redirect_uri = config.twitch.public_base_url.join(oauth::CALLBACK_PATH)?;
    let authorize_url = oauth_client.authorize_url(redirect_uri.as_str(), oauth::USER_SCOPES)?;
    info!(
        stage = "oauth",
        url = %authorize_url,
        "open this URL as the broadcaster to enable gifter lookups"
    );

    let (chat_sender, outbound) = ChatSender::new(&config.chat.channel);
    let user_tokens = UserTokenStore::new();
    let gifters = GifterLookup::new(
        helix.clone(),
        config.twitch.broadcaster_id.clone(),
        user_tokens.clone(),
    )
    .with_timeout(DEFAULT_LOOKUP_TIMEOUT.min(config.http_timeout));
    let relay = NotificationRelay::new(
        Arc::new(Mutex::new(DedupState::new())),
        chat_sender.clone(),
        gifters,
    );

    let state = router::AppState::new(
        metrics,
        SignatureVerifier::new(&config.twitch.webhook_secret),
        relay,
        oauth_client.clone(),
        user_tokens,
        redirect_uri.as_str(),
    );

    let bot = ChatBot::new(config.chat.username.clone(), chat_sender);
    tokio::spawn(ChatConnection::new(config.chat.clone(), bot).run_forever(outbound));

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        stage = "startup",
        addr = %config.bind_addr,
        env = %config.environment.as_str(),
        "starting HTTP server"
    );
    let app = router::app_router(state);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let desired = SubscriptionSpec::desired_set(
        config.twitch.public_base_url.as_str(),
        &config.twitch.broadcaster_id,
        &config.twitch.webhook_secret,
    );
    StartupSequence::new(
        TokenManager::new(oauth_client),
        SubscriptionReconciler::new(helix),
        desired,
        config.startup_max_attempts,
    )
    .run()
    .await?;

    server.await??;
    Ok(())
}
