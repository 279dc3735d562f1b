use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use snowbot_twitch::TwitchOAuthClient;

use crate::oauth::{self, UserTokenStore};
use crate::relay::NotificationRelay;
use crate::signature::SignatureVerifier;
use crate::{telemetry, webhook};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    verifier: SignatureVerifier,
    relay: NotificationRelay,
    oauth: TwitchOAuthClient,
    user_tokens: UserTokenStore,
    redirect_uri: Arc<str>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        verifier: SignatureVerifier,
        relay: NotificationRelay,
        oauth: TwitchOAuthClient,
        user_tokens: UserTokenStore,
        redirect_uri: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            metrics,
            verifier,
            relay,
            oauth,
            user_tokens,
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn relay(&self) -> &NotificationRelay {
        &self.relay
    }

    pub fn oauth(&self) -> &TwitchOAuthClient {
        &self.oauth
    }

    pub fn user_tokens(&self) -> &UserTokenStore {
        &self.user_tokens
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/auth", get(oauth::callback))
        .route("/webhooks/follow", post(webhook::follow))
        .route("/webhooks/subscribe", post(webhook::subscribe))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
