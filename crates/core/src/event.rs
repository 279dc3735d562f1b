use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// EventSub subscription types the bot relays into chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "channel.follow")]
    Follow,
    #[serde(rename = "channel.subscribe")]
    Subscribe,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::Follow, EventType::Subscribe];

    /// Returns the EventSub `type` string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "channel.follow",
            Self::Subscribe => "channel.subscribe",
        }
    }

    /// Subscription version requested from Twitch.
    pub fn version(self) -> &'static str {
        match self {
            Self::Follow => "2",
            Self::Subscribe => "1",
        }
    }

    /// Path segment of the callback route (`/webhooks/<segment>`).
    pub fn route_segment(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Subscribe => "subscribe",
        }
    }

    pub fn from_type_str(value: &str) -> Option<Self> {
        match value {
            "channel.follow" => Some(Self::Follow),
            "channel.subscribe" => Some(Self::Subscribe),
            _ => None,
        }
    }
}

/// Desired push-event subscription, derived from static configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub event_type: EventType,
    pub broadcaster_id: String,
    pub callback_url: String,
    pub secret: String,
}

impl SubscriptionSpec {
    /// Builds one spec per relayed event type, with callbacks under `<base>webhooks/`.
    ///
    /// `callback_base` is expected to end with a slash.
    pub fn desired_set(callback_base: &str, broadcaster_id: &str, secret: &str) -> Vec<Self> {
        EventType::ALL
            .iter()
            .map(|&event_type| Self {
                event_type,
                broadcaster_id: broadcaster_id.to_string(),
                callback_url: format!("{callback_base}webhooks/{}", event_type.route_segment()),
                secret: secret.to_string(),
            })
            .collect()
    }

    /// Condition block for the create request.
    pub fn condition(&self) -> Value {
        match self.event_type {
            EventType::Follow => json!({
                "broadcaster_user_id": self.broadcaster_id,
                "moderator_user_id": self.broadcaster_id,
            }),
            EventType::Subscribe => json!({
                "broadcaster_user_id": self.broadcaster_id,
            }),
        }
    }

    /// Full JSON body for `POST /eventsub/subscriptions`.
    pub fn to_request_body(&self) -> Value {
        json!({
            "type": self.event_type.as_str(),
            "version": self.event_type.version(),
            "condition": self.condition(),
            "transport": {
                "method": "webhook",
                "callback": self.callback_url,
                "secret": self.secret,
            }
        })
    }
}

/// Event carried by a verified notification delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Follow {
        user_id: String,
        user_name: String,
    },
    Subscribe {
        user_id: String,
        user_name: String,
        is_gift: bool,
    },
}

impl Notification {
    /// Parses a notification body for the route's event type.
    pub fn parse(expected: EventType, payload: &Value) -> Result<Self, PayloadError> {
        let envelope: NotificationEnvelope = serde_json::from_value(payload.clone())?;
        if let Some(actual) = envelope
            .subscription
            .as_ref()
            .map(|sub| sub.kind.as_str())
        {
            if actual != expected.as_str() {
                return Err(PayloadError::UnexpectedType {
                    expected: expected.as_str(),
                    actual: actual.to_string(),
                });
            }
        }
        let event = envelope.event.ok_or(PayloadError::MissingEvent)?;

        match expected {
            EventType::Follow => Ok(Self::Follow {
                user_id: event.user_id,
                user_name: event.user_name,
            }),
            EventType::Subscribe => Ok(Self::Subscribe {
                user_id: event.user_id,
                user_name: event.user_name,
                is_gift: event.is_gift,
            }),
        }
    }
}

/// Returns the `challenge` field of a verification delivery.
pub fn challenge(payload: &Value) -> Option<&str> {
    payload.get("challenge").and_then(Value::as_str)
}

/// Errors raised while reading a notification payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to parse payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing event block in payload")]
    MissingEvent,
    #[error("payload for {actual} delivered to the {expected} callback")]
    UnexpectedType {
        expected: &'static str,
        actual: String,
    },
}

#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    #[serde(default)]
    subscription: Option<SubscriptionBlock>,
    #[serde(default)]
    event: Option<EventBlock>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionBlock {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct EventBlock {
    user_id: String,
    user_name: String,
    #[serde(default)]
    is_gift: bool,
}
