use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use snowbot_core::{EventType, SubscriptionSpec};
use thiserror::Error;
use url::Url;

/// Client for the Helix endpoints the bot relies on: EventSub management and
/// broadcaster subscription lookups.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    base_url: Url,
    client_id: String,
}

impl HelixClient {
    /// Creates a new Helix client with the provided configuration.
    pub fn new(client_id: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
        }
    }

    /// Fetches one page of EventSub subscriptions owned by this client id.
    pub async fn list_eventsub_subscriptions(
        &self,
        access_token: &str,
        after: Option<&str>,
    ) -> Result<EventSubPage, HelixError> {
        let mut url = self.base_url.join("eventsub/subscriptions")?;
        if let Some(after) = after {
            url.query_pairs_mut().append_pair("after", after);
        }

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        parse_json::<EventSubListResponse>(response)
            .await
            .map(EventSubPage::from)
    }

    /// Deletes a single EventSub subscription.
    pub async fn delete_eventsub_subscription(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<(), HelixError> {
        let mut url = self.base_url.join("eventsub/subscriptions")?;
        url.query_pairs_mut().append_pair("id", id);

        let response = self
            .authorized_request(Method::DELETE, url, access_token)
            .send()
            .await?;

        ensure_success(response).await
    }

    /// Creates a webhook EventSub subscription for the provided spec.
    pub async fn create_eventsub_subscription(
        &self,
        access_token: &str,
        spec: &SubscriptionSpec,
    ) -> Result<(), HelixError> {
        let url = self.base_url.join("eventsub/subscriptions")?;
        let response = self
            .authorized_request(Method::POST, url, access_token)
            .json(&spec.to_request_body())
            .send()
            .await?;

        ensure_success(response).await
    }

    /// Looks up a user's subscription to the broadcaster, used for gift attribution.
    pub async fn broadcaster_subscription(
        &self,
        access_token: &str,
        broadcaster_id: &str,
        user_id: &str,
    ) -> Result<Option<HelixSubscription>, HelixError> {
        let mut url = self.base_url.join("subscriptions")?;
        url.query_pairs_mut()
            .append_pair("broadcaster_id", broadcaster_id)
            .append_pair("user_id", user_id);

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        let body = parse_json::<DataResponse<HelixSubscription>>(response).await?;
        Ok(body.data.into_iter().next())
    }

    fn authorized_request(
        &self,
        method: Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {access_token}"))
    }
}

/// Page of EventSub subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSubPage {
    pub data: Vec<RemoteSubscription>,
    pub cursor: Option<String>,
}

impl From<EventSubListResponse> for EventSubPage {
    fn from(value: EventSubListResponse) -> Self {
        Self {
            data: value.data,
            cursor: value
                .pagination
                .and_then(|p| p.cursor)
                .filter(|cursor| !cursor.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct EventSubListResponse {
    #[serde(default)]
    data: Vec<RemoteSubscription>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize)]
struct DataResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

/// EventSub subscription as reported by Twitch.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteSubscription {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl RemoteSubscription {
    /// Returns the relayed event type, if this subscription is one the bot manages.
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_type_str(&self.kind)
    }
}

/// Broadcaster subscription entry returned by `GET /subscriptions`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HelixSubscription {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub is_gift: bool,
    #[serde(default)]
    pub gifter_name: Option<String>,
    pub tier: String,
}

impl HelixSubscription {
    /// Gifter display name, treating Twitch's empty string as absent.
    pub fn gifter(&self) -> Option<&str> {
        self.gifter_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

/// Errors produced by the Helix client.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn ensure_success(response: Response) -> Result<(), HelixError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }
    Ok(())
}

async fn parse_json<T>(response: Response) -> Result<T, HelixError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }

    Ok(response.json().await?)
}
