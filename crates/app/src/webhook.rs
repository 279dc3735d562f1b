use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{error, info, warn};

use snowbot_core::{event, EventType, Notification};

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::signature::HEADER_MESSAGE_TYPE;

/// `POST /webhooks/follow`
pub async fn follow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    handle_delivery(&state, EventType::Follow, &headers, &body).await
}

/// `POST /webhooks/subscribe`
pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    handle_delivery(&state, EventType::Subscribe, &headers, &body).await
}

async fn handle_delivery(
    state: &AppState,
    route: EventType,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();
    let message_type = headers
        .get(HEADER_MESSAGE_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| MessageType::try_from(value).ok());
    let label = message_type.map_or("unknown", MessageType::metric_label);

    let result = dispatch(state, route, message_type, headers, body).await;
    histogram!("webhook_ack_latency_seconds", "type" => label)
        .record(start.elapsed().as_secs_f64());
    result
}

async fn dispatch(
    state: &AppState,
    route: EventType,
    message_type: Option<MessageType>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ProblemResponse> {
    let verification = state.verifier().verify(headers, body);
    if verification.applicable && !verification.valid {
        counter!("eventsub_invalid_signature_total", "route" => route.route_segment())
            .increment(1);
        warn!(stage = "ingress", route = route.route_segment(), "signature mismatch");
        return Err(ProblemResponse::forbidden(route));
    }

    match message_type {
        Some(MessageType::Verification) => {
            let challenge = serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|payload| event::challenge(&payload).map(str::to_string));
            let Some(challenge) = challenge else {
                warn!(stage = "ingress", route = route.route_segment(), "verification delivery without challenge");
                return Err(ProblemResponse::forbidden(route));
            };

            counter!("eventsub_ingress_total", "type" => MessageType::Verification.metric_label())
                .increment(1);
            info!(
                stage = "ingress",
                route = route.route_segment(),
                signed = verification.applicable,
                "answered verification challenge"
            );
            Ok(plain_text(challenge))
        }
        Some(MessageType::Notification) if verification.is_verified() => {
            counter!("eventsub_ingress_total", "type" => MessageType::Notification.metric_label())
                .increment(1);
            let payload: Value = serde_json::from_slice(body).map_err(|err| {
                ProblemResponse::invalid_payload(format!("failed to parse payload: {err}"))
            })?;
            let notification = Notification::parse(route, &payload)
                .map_err(|err| ProblemResponse::invalid_payload(err.to_string()))?;

            state.relay().relay(&notification).await.map_err(|err| {
                error!(stage = "relay", route = route.route_segment(), error = %err, "failed to relay notification");
                ProblemResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "relay_failed", err.to_string())
            })?;

            Ok(plain_text(format!(
                "Successful {} notification",
                route.route_segment()
            )))
        }
        Some(MessageType::Revocation) if verification.is_verified() => {
            counter!("eventsub_ingress_total", "type" => MessageType::Revocation.metric_label())
                .increment(1);
            let status = serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|payload| {
                    payload
                        .pointer("/subscription/status")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "unknown".to_string());
            warn!(stage = "ingress", route = route.route_segment(), %status, "subscription revoked");
            Ok(plain_text("Acknowledged revocation"))
        }
        _ => {
            warn!(
                stage = "ingress",
                route = route.route_segment(),
                message_type = message_type.map_or("unknown", MessageType::metric_label),
                signed = verification.applicable,
                "rejected unverified delivery"
            );
            Err(ProblemResponse::forbidden(route))
        }
    }
}

fn plain_text(body: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.into(),
    )
        .into_response()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    Verification,
    Notification,
    Revocation,
}

impl TryFrom<&str> for MessageType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "webhook_callback_verification" => Ok(Self::Verification),
            "notification" => Ok(Self::Notification),
            "revocation" => Ok(Self::Revocation),
            other => Err(format!("unsupported message type: {other}")),
        }
    }
}

impl MessageType {
    fn metric_label(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Notification => "notification",
            Self::Revocation => "revocation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use serde_json::json;
    use snowbot_core::responses;
    use tower::ServiceExt;

    use crate::router::{app_router, tests::TestContext};
    use crate::signature::{HEADER_MESSAGE_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP};

    const MESSAGE_ID: &str = "f1c2a387-161a-49f9-a165-0f21d7a4e1c4";
    const TIMESTAMP: &str = "2024-01-01T00:00:00.123456789Z";

    fn delivery(
        ctx: &TestContext,
        path: &str,
        message_type: &str,
        body: &Value,
        signed: bool,
    ) -> Request<Body> {
        let raw = serde_json::to_vec(body).expect("json");
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(HEADER_MESSAGE_TYPE, message_type);
        if signed {
            let signature = ctx
                .state
                .verifier()
                .signature_header(MESSAGE_ID, TIMESTAMP, &raw)
                .expect("signature");
            builder = builder
                .header(HEADER_MESSAGE_ID, MESSAGE_ID)
                .header(HEADER_TIMESTAMP, TIMESTAMP)
                .header(HEADER_SIGNATURE, signature);
        }
        builder.body(Body::from(raw)).expect("request")
    }

    async fn body_text(response: Response) -> String {
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8")
    }

    fn follow_payload(user: &str) -> Value {
        json!({
            "subscription": { "type": "channel.follow", "version": "2" },
            "event": {
                "user_id": "1001",
                "user_name": user,
                "broadcaster_user_id": "42"
            }
        })
    }

    #[tokio::test]
    async fn unsigned_challenge_is_echoed() {
        let ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/follow",
            "webhook_callback_verification",
            &json!({ "challenge": "pogchamp-kappa-360noscope-vohiyo" }),
            false,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "pogchamp-kappa-360noscope-vohiyo");
    }

    #[tokio::test]
    async fn signed_challenge_is_echoed() {
        let ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/subscribe",
            "webhook_callback_verification",
            &json!({ "challenge": "abc123", "subscription": { "type": "channel.subscribe" } }),
            true,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "abc123");
    }

    #[tokio::test]
    async fn challenge_without_token_is_forbidden() {
        let ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/follow",
            "webhook_callback_verification",
            &json!({ "subscription": {} }),
            false,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn verified_follow_is_relayed() {
        let mut ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/follow",
            "notification",
            &follow_payload("alice"),
            true,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Successful follow notification");
        assert_eq!(ctx.sent(), vec![responses::follow("alice")]);
    }

    #[tokio::test]
    async fn repeated_follow_is_acknowledged_without_second_message() {
        let mut ctx = TestContext::new().await;
        for _ in 0..2 {
            let request = delivery(
                &ctx,
                "/webhooks/follow",
                "notification",
                &follow_payload("alice"),
                true,
            );
            let response = app_router(ctx.state.clone())
                .oneshot(request)
                .await
                .expect("handler should respond");
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(ctx.sent().len(), 1);
    }

    #[tokio::test]
    async fn tampered_notification_is_forbidden_and_not_relayed() {
        let mut ctx = TestContext::new().await;
        let mut request = delivery(
            &ctx,
            "/webhooks/follow",
            "notification",
            &follow_payload("alice"),
            true,
        );
        request.headers_mut().insert(
            HEADER_SIGNATURE,
            "sha256=0000000000000000000000000000000000000000000000000000000000000000"
                .parse()
                .expect("header"),
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("application/problem+json")
        );
        let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(body["detail"], "Forbidden follow notification");
        assert!(ctx.sent().is_empty());
    }

    #[tokio::test]
    async fn unsigned_notification_is_forbidden() {
        let mut ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/subscribe",
            "notification",
            &json!({ "event": { "user_id": "1", "user_name": "bob", "is_gift": false } }),
            false,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(ctx.sent().is_empty());
    }

    #[tokio::test]
    async fn verified_subscribe_is_relayed() {
        let mut ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/subscribe",
            "notification",
            &json!({
                "subscription": { "type": "channel.subscribe", "version": "1" },
                "event": { "user_id": "1", "user_name": "bob", "tier": "1000", "is_gift": false }
            }),
            true,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Successful subscribe notification");
        assert_eq!(ctx.sent(), vec![responses::subscribe("bob", None)]);
    }

    #[tokio::test]
    async fn verified_malformed_payload_is_bad_request() {
        let mut ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/follow",
            "notification",
            &json!({ "subscription": { "type": "channel.follow" } }),
            true,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(ctx.sent().is_empty());
    }

    #[tokio::test]
    async fn payload_for_other_route_is_bad_request() {
        let mut ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/subscribe",
            "notification",
            &follow_payload("alice"),
            true,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(ctx.sent().is_empty());
    }

    #[tokio::test]
    async fn verified_revocation_is_acknowledged() {
        let mut ctx = TestContext::new().await;
        let request = delivery(
            &ctx,
            "/webhooks/follow",
            "revocation",
            &json!({ "subscription": { "type": "channel.follow", "status": "authorization_revoked" } }),
            true,
        );

        let response = app_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(ctx.sent().is_empty());
    }
}
