use std::{sync::Arc, time::Duration};

use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use snowbot_core::{responses, DedupState, EventType, Notification};
use snowbot_twitch::{HelixClient, HelixError};

use crate::chat::{ChatError, ChatSender};
use crate::oauth::UserTokenStore;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no broadcaster user token has been authorized yet")]
    MissingUserToken,
    #[error("subscription lookup failed: {0}")]
    Helix(#[from] HelixError),
    #[error("subscription lookup timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to queue chat message: {0}")]
    Chat(#[from] ChatError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Emitted,
    Duplicate,
}

/// Resolves who gifted a subscription through the broadcaster subscription endpoint.
#[derive(Clone)]
pub struct GifterLookup {
    helix: HelixClient,
    broadcaster_id: String,
    user_tokens: UserTokenStore,
    timeout: Duration,
}

impl GifterLookup {
    pub fn new(
        helix: HelixClient,
        broadcaster_id: impl Into<String>,
        user_tokens: UserTokenStore,
    ) -> Self {
        Self {
            helix,
            broadcaster_id: broadcaster_id.into(),
            user_tokens,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `Ok(None)` when the lookup succeeded but names no gifter.
    pub async fn resolve(&self, user_id: &str) -> Result<Option<String>, LookupError> {
        let token = self
            .user_tokens
            .get()
            .await
            .ok_or(LookupError::MissingUserToken)?;

        let lookup = self
            .helix
            .broadcaster_subscription(&token, &self.broadcaster_id, user_id);
        let subscription = tokio::time::timeout(self.timeout, lookup)
            .await
            .map_err(|_| LookupError::Timeout(self.timeout))??;

        Ok(subscription.and_then(|sub| sub.gifter().map(str::to_string)))
    }
}

/// Turns verified notifications into chat messages, suppressing immediate repeats.
///
/// The dedup lock is held from the repeat check until the message is queued,
/// so concurrent deliveries for the same kind are relayed one at a time.
#[derive(Clone)]
pub struct NotificationRelay {
    dedup: Arc<Mutex<DedupState>>,
    chat: ChatSender,
    gifters: GifterLookup,
}

impl NotificationRelay {
    pub fn new(dedup: Arc<Mutex<DedupState>>, chat: ChatSender, gifters: GifterLookup) -> Self {
        Self {
            dedup,
            chat,
            gifters,
        }
    }

    pub async fn relay(&self, notification: &Notification) -> Result<RelayOutcome, RelayError> {
        match notification {
            Notification::Follow { user_name, .. } => self.on_follow(user_name).await,
            Notification::Subscribe {
                user_id,
                user_name,
                is_gift,
            } => self.on_subscribe(user_id, user_name, *is_gift).await,
        }
    }

    pub async fn on_follow(&self, actor: &str) -> Result<RelayOutcome, RelayError> {
        let mut dedup = self.dedup.lock().await;
        if dedup.is_repeat(EventType::Follow, actor) {
            return Ok(duplicate(EventType::Follow, actor));
        }

        self.chat.say(responses::follow(actor))?;
        dedup.record(EventType::Follow, actor);
        Ok(emitted(EventType::Follow, actor))
    }

    pub async fn on_subscribe(
        &self,
        user_id: &str,
        actor: &str,
        is_gift: bool,
    ) -> Result<RelayOutcome, RelayError> {
        let mut dedup = self.dedup.lock().await;
        if dedup.is_repeat(EventType::Subscribe, actor) {
            return Ok(duplicate(EventType::Subscribe, actor));
        }

        let gifter = if is_gift {
            match self.gifters.resolve(user_id).await {
                Ok(gifter) => gifter,
                Err(err) => {
                    warn!(stage = "relay", user = actor, error = %err, "gifter lookup failed; sending base message");
                    None
                }
            }
        } else {
            None
        };

        self.chat
            .say(responses::subscribe(actor, gifter.as_deref()))?;
        dedup.record(EventType::Subscribe, actor);
        Ok(emitted(EventType::Subscribe, actor))
    }
}

fn emitted(kind: EventType, actor: &str) -> RelayOutcome {
    counter!("relay_messages_total", "kind" => kind.as_str()).increment(1);
    info!(stage = "relay", kind = kind.as_str(), user = actor, "relayed notification");
    RelayOutcome::Emitted
}

fn duplicate(kind: EventType, actor: &str) -> RelayOutcome {
    counter!("relay_duplicates_total", "kind" => kind.as_str()).increment(1);
    info!(stage = "relay", kind = kind.as_str(), user = actor, "suppressed repeated notification");
    RelayOutcome::Duplicate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::OutboundMessage;
    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use url::Url;

    struct Harness {
        relay: NotificationRelay,
        outbound: UnboundedReceiver<OutboundMessage>,
        user_tokens: UserTokenStore,
    }

    fn harness(helix_base: &str) -> Harness {
        harness_with_timeout(helix_base, DEFAULT_LOOKUP_TIMEOUT)
    }

    fn harness_with_timeout(helix_base: &str, timeout: Duration) -> Harness {
        let (chat, outbound) = ChatSender::new("snowxcones");
        let user_tokens = UserTokenStore::new();
        let helix = HelixClient::new(
            "client",
            Url::parse(helix_base).expect("url"),
            Client::builder().build().expect("client"),
        );
        let gifters =
            GifterLookup::new(helix, "42", user_tokens.clone()).with_timeout(timeout);
        Harness {
            relay: NotificationRelay::new(Arc::new(Mutex::new(DedupState::new())), chat, gifters),
            outbound,
            user_tokens,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<OutboundMessage>) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(message) = rx.try_recv() {
            texts.push(message.text);
        }
        texts
    }

    #[tokio::test]
    async fn consecutive_follows_from_same_user_collapse() {
        let mut h = harness("http://127.0.0.1:9/helix/");

        let outcomes = [
            h.relay.on_follow("alice").await.expect("relay"),
            h.relay.on_follow("alice").await.expect("relay"),
            h.relay.on_follow("bob").await.expect("relay"),
            h.relay.on_follow("bob").await.expect("relay"),
        ];
        assert_eq!(
            outcomes,
            [
                RelayOutcome::Emitted,
                RelayOutcome::Duplicate,
                RelayOutcome::Emitted,
                RelayOutcome::Duplicate
            ]
        );

        let texts = drain(&mut h.outbound);
        assert_eq!(
            texts,
            vec![responses::follow("alice"), responses::follow("bob")]
        );
    }

    #[tokio::test]
    async fn alternating_actors_are_all_relayed() {
        let mut h = harness("http://127.0.0.1:9/helix/");
        for actor in ["alice", "bob", "alice"] {
            h.relay.on_follow(actor).await.expect("relay");
        }
        assert_eq!(drain(&mut h.outbound).len(), 3);
    }

    #[tokio::test]
    async fn follow_and_subscribe_dedup_independently() {
        let mut h = harness("http://127.0.0.1:9/helix/");
        h.relay.on_follow("alice").await.expect("relay");
        let outcome = h
            .relay
            .on_subscribe("1", "alice", false)
            .await
            .expect("relay");
        assert_eq!(outcome, RelayOutcome::Emitted);
        assert_eq!(
            drain(&mut h.outbound),
            vec![
                responses::follow("alice"),
                responses::subscribe("alice", None)
            ]
        );
    }

    #[tokio::test]
    async fn gift_without_user_token_sends_base_message() {
        let mut h = harness("http://127.0.0.1:9/helix/");
        h.relay
            .on_subscribe("7", "carol", true)
            .await
            .expect("relay");
        assert_eq!(
            drain(&mut h.outbound),
            vec![responses::subscribe("carol", None)]
        );
    }

    #[tokio::test]
    async fn failed_gift_lookup_sends_exactly_one_base_message() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/subscriptions");
                then.status(500).body("boom");
            })
            .await;

        let mut h = harness(&server.url("/helix/"));
        h.user_tokens.set("user-token".into()).await;

        h.relay
            .on_subscribe("7", "carol", true)
            .await
            .expect("relay");

        lookup.assert_async().await;
        assert_eq!(
            drain(&mut h.outbound),
            vec![responses::subscribe("carol", None)]
        );
    }

    #[tokio::test]
    async fn gift_lookup_names_gifter() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/subscriptions")
                    .query_param("broadcaster_id", "42")
                    .query_param("user_id", "7")
                    .header("Authorization", "Bearer user-token");
                then.status(200).json_body(json!({
                    "data": [{
                        "user_id": "7",
                        "user_name": "carol",
                        "is_gift": true,
                        "gifter_name": "dave",
                        "tier": "1000"
                    }]
                }));
            })
            .await;

        let mut h = harness(&server.url("/helix/"));
        h.user_tokens.set("user-token".into()).await;

        h.relay
            .relay(&Notification::Subscribe {
                user_id: "7".into(),
                user_name: "carol".into(),
                is_gift: true,
            })
            .await
            .expect("relay");

        lookup.assert_async().await;
        assert_eq!(
            drain(&mut h.outbound),
            vec![responses::subscribe("carol", Some("dave"))]
        );
    }

    #[tokio::test]
    async fn slow_gift_lookup_times_out_to_base_message() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/subscriptions");
                then.status(200)
                    .delay(Duration::from_secs(3))
                    .json_body(json!({
                        "data": [{
                            "user_id": "7",
                            "user_name": "carol",
                            "is_gift": true,
                            "gifter_name": "dave",
                            "tier": "1000"
                        }]
                    }));
            })
            .await;

        let mut h = harness_with_timeout(&server.url("/helix/"), Duration::from_millis(200));
        h.user_tokens.set("user-token".into()).await;

        let started = std::time::Instant::now();
        h.relay
            .on_subscribe("7", "carol", true)
            .await
            .expect("relay");

        assert!(started.elapsed() < Duration::from_secs(2));
        lookup.assert_async().await;
        assert_eq!(
            drain(&mut h.outbound),
            vec![responses::subscribe("carol", None)]
        );
    }

    #[tokio::test]
    async fn gift_lookup_without_matching_subscription_sends_base_message() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/subscriptions");
                then.status(200).json_body(json!({ "data": [] }));
            })
            .await;

        let mut h = harness(&server.url("/helix/"));
        h.user_tokens.set("user-token".into()).await;
        h.relay
            .on_subscribe("7", "carol", true)
            .await
            .expect("relay");

        lookup.assert_async().await;
        assert_eq!(
            drain(&mut h.outbound),
            vec![responses::subscribe("carol", None)]
        );
    }

    #[tokio::test]
    async fn blank_gifter_name_sends_base_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/subscriptions");
                then.status(200).json_body(json!({
                    "data": [{
                        "user_id": "7",
                        "user_name": "carol",
                        "is_gift": true,
                        "gifter_name": "",
                        "tier": "1000"
                    }]
                }));
            })
            .await;

        let mut h = harness(&server.url("/helix/"));
        h.user_tokens.set("user-token".into()).await;
        h.relay
            .on_subscribe("7", "carol", true)
            .await
            .expect("relay");

        assert_eq!(
            drain(&mut h.outbound),
            vec![responses::subscribe("carol", None)]
        );
    }

    #[tokio::test]
    async fn non_gift_skips_lookup() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/subscriptions");
                then.status(200).json_body(json!({ "data": [] }));
            })
            .await;

        let mut h = harness(&server.url("/helix/"));
        h.user_tokens.set("user-token".into()).await;
        h.relay
            .on_subscribe("7", "carol", false)
            .await
            .expect("relay");

        lookup.assert_hits_async(0).await;
        assert_eq!(drain(&mut h.outbound).len(), 1);
    }

    #[tokio::test]
    async fn closed_chat_queue_does_not_record_actor() {
        let h = harness("http://127.0.0.1:9/helix/");
        let Harness {
            relay, outbound, ..
        } = h;
        drop(outbound);

        assert!(matches!(
            relay.on_follow("alice").await,
            Err(RelayError::Chat(ChatError::QueueClosed))
        ));
        assert_eq!(relay.dedup.lock().await.last(EventType::Follow), None);
    }
}
